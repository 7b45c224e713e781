pub const SCHEMA: &str = r#"
-- processed_emails table
CREATE TABLE IF NOT EXISTS processed_emails (
    email_id TEXT PRIMARY KEY,
    subject TEXT NOT NULL,
    onenote_page_id TEXT,
    processed_at TEXT NOT NULL,
    received_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_processed_at ON processed_emails(processed_at);

-- tasks table (reserved, nothing reads or writes it yet)
CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email_id TEXT UNIQUE,
    title TEXT NOT NULL,
    due_date TEXT,
    completed INTEGER DEFAULT 0,
    created_at TEXT NOT NULL,
    completed_at TEXT
);
"#;

mod message;
mod note;
mod record;

pub use message::{BodyContentType, RawMessage};
pub use note::Note;
pub use record::ProcessedRecord;

mod transformer;

pub use transformer::NoteTransformer;

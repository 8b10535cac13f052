pub mod path;

pub use path::{dedup_roots, expand_path, normalize_root, same_root};

pub mod category_path;

pub use category_path::{normalize, normalize_str, Breadcrumb, InvalidPath, NormalizedPath};

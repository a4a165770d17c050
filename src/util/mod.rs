//! HTML helpers shared by feed normalization.

mod html;

pub use html::{clean_html, first_image_src};

pub mod fetch;
pub mod parser;
pub mod url_template;

pub use fetch::*;
pub use parser::*;
pub use url_template::*;

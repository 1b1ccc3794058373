pub(crate) mod mocks;
mod utils;

pub use utils::io::load_test_file;

pub mod logging;
pub mod text;
pub mod timing;

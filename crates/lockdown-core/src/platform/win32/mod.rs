pub mod hooks;
pub mod window;

pub mod clock;
pub mod dir;
pub mod logging;
pub mod runtime;
pub mod time;
pub mod url;

pub mod capital;
pub mod cursor;
pub mod grant;
pub mod inputs;
pub mod symbol;

pub use capital::*;
pub use cursor::*;
pub use grant::*;
pub use inputs::*;
pub use symbol::*;

pub mod fjall;
pub mod mem;
pub mod traits;

pub use self::fjall::FjallStore;
pub use mem::MemStore;
pub use traits::LocalStore;

pub mod paths;
pub mod store;

pub use store::ObjectStore;

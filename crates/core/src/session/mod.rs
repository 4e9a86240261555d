pub mod store;

pub use store::{spawn_sweeper, Mutation, SessionStore, SessionStoreError};

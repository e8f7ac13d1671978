//! Background pipelines that keep crypto work off the sync exchange path.

mod decrypter;
mod encrypter;
mod reorder;

pub use {
    decrypter::{Completion, DecrypterPool, InsertDocCallback},
    encrypter::EncrypterPool,
    reorder::{ReorderBuffer, ReorderError},
};

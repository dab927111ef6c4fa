//! Wire protocol shared with the online-model service

pub mod records;

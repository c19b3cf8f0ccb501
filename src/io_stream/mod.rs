//! Streaming container engine: writer and reader.
//!
//! # Writer
//! [`Locker`] writes the plain header on `open`, collects entries, encrypts
//! them as one header, then takes each file's bytes in entry order.  Current
//! containers cut file data into 64 KiB AEAD chunks; legacy containers run
//! all data through one zlib stream and a 32-byte-unit block cipher.
//!
//! # Reader
//! [`Unlocker`] locates the container (also inside a self-extracting file),
//! selects the decoder for its format version, authenticates the header
//! against the attempt counter, then returns file data in the same order.
//!
//! Both sessions own their stream; pass `&mut File` to keep ownership.

pub mod legacy;
pub mod locker;
pub mod unlocker;

pub use locker::{Locker, LockerOptions};
pub use unlocker::{ContainerInfo, Unlocker};

//! Flashing engine for devices programmed over an asynchronous message
//! link: on-chip STM flash and external M25 serial NOR flash.
//!
//! The engine turns the link's callback-driven responses into blocking
//! erase/write/read operations, plans the minimal set of sector erases for
//! a sparse firmware image, and programs the image in fixed-size chunks
//! with mandatory read-back verification.

pub mod error;
pub mod family;
pub mod flash;
pub mod image;
pub mod link;
pub mod progress;

pub use error::{Error, Result};
pub use family::{DeviceFamily, Opcodes};
pub use flash::{CHUNK_SIZE, Flash, ProgramStats};
pub use image::{AddressRange, IhexImage, SourceImage, address_ranges};
pub use link::{Callback, Link};

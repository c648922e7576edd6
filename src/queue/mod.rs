//! Components A and B: the byte ring buffer and the variable-length
//! packet ring that sit between the interrupt path and the main loop.

pub mod byte_queue;
pub mod packet_queue;

pub use byte_queue::ByteQueue;
pub use packet_queue::{EncodeFn, PacketQueue};

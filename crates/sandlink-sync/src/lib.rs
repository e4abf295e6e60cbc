//! Lock-free handoff primitives shared between network threads and the
//! threads that produce or consume heightfield state.

mod triple_buffer;

pub use triple_buffer::{TripleBufferReader, TripleBufferWriter, triple_buffer};

mod decoder;
mod reassembler;
mod stream;

pub use decoder::{
    boundary_from_content_type, MultipartDecoder, PartEvent, PartHeaders, MAX_HEADER_BYTES,
};
pub use reassembler::{FrameReassembler, ReassemblyStats};
pub use stream::{reassemble_frames, StreamSummary};

pub mod rtu_server;

pub use rtu_server::{inter_frame_gap, open_port, split_frames, RtuServer, ServerStats};

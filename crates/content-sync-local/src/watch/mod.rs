mod marker_file;

pub use marker_file::MarkerFileTransport;

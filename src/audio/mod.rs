pub mod extract;
pub mod splitter;

pub use extract::{check_ffmpeg, check_ffprobe, decode_to_pcm_f32, export_range_mp3, get_audio_duration};
pub use splitter::{compute_chunk_ranges, remove_staging_dir, split_audio, ChunkFile};

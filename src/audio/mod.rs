pub mod backend;
pub mod codec;
pub mod convert;
pub mod file;
pub mod microphone;

pub use backend::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource,
    CAPTURE_BLOCK_SIZE, CAPTURE_SAMPLE_RATE,
};
pub use codec::{decode_frame, encode_frame, DecodedAudio, SampleOverflow};
pub use convert::{downmix_to_mono, resample_linear, FrameAssembler, LinearResampler};
pub use file::{write_wav, AudioFile, FileBackend, WavRecorder};
pub use microphone::MicrophoneBackend;

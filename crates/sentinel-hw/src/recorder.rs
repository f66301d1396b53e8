//! Session video recording: MJPEG frames in an AVI container.
//!
//! Each recording session produces one `video_YYYYMMDD_HHMMSS.avi` at a
//! fixed frame rate and the source's native resolution. Frames are
//! JPEG-encoded as written; `finalize` patches the RIFF sizes and writes
//! the index, after which the file is complete. A recorder dropped without
//! finalizing patches itself up on a best-effort basis so a crash mid-stop
//! still leaves a playable file.

use crate::frame::Frame;
use chrono::Local;
use image::codecs::jpeg::JpegEncoder;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const JPEG_QUALITY: u8 = 80;
const AVIF_HASINDEX: u32 = 0x10;
const AVIIF_KEYFRAME: u32 = 0x10;

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("jpeg encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("frame is {got_w}x{got_h}, recording is {want_w}x{want_h}")]
    DimensionMismatch {
        got_w: u32,
        got_h: u32,
        want_w: u32,
        want_h: u32,
    },
}

/// Writer for one recording session.
pub struct VideoRecorder {
    writer: BufWriter<File>,
    path: PathBuf,
    width: u32,
    height: u32,
    /// (offset of the chunk within the movi list, chunk payload size)
    frames: Vec<(u32, u32)>,
    movi_start: u64,
    finalized: bool,
}

impl VideoRecorder {
    /// Create `dir/video_YYYYMMDD_HHMMSS.avi` and write the AVI headers.
    pub fn create(dir: &Path, width: u32, height: u32, fps: u32) -> Result<Self, RecorderError> {
        std::fs::create_dir_all(dir)?;
        let name = format!("video_{}.avi", Local::now().format("%Y%m%d_%H%M%S"));
        let path = dir.join(name);

        let file = File::create(&path)?;
        let mut writer = BufWriter::new(file);

        write_headers(&mut writer, width, height, fps.max(1))?;
        let movi_start = writer.stream_position()?;

        tracing::info!(path = %path.display(), width, height, fps, "recording started");

        Ok(Self {
            writer,
            path,
            width,
            height,
            frames: Vec::new(),
            movi_start,
            finalized: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// JPEG-encode and append one frame.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<(), RecorderError> {
        if frame.width != self.width || frame.height != self.height {
            return Err(RecorderError::DimensionMismatch {
                got_w: frame.width,
                got_h: frame.height,
                want_w: self.width,
                want_h: self.height,
            });
        }

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY).encode(
            &frame.data,
            frame.width,
            frame.height,
            image::ExtendedColorType::Rgb8,
        )?;

        let offset = (self.writer.stream_position()? - self.movi_start) as u32;
        self.writer.write_all(b"00dc")?;
        self.writer.write_all(&(jpeg.len() as u32).to_le_bytes())?;
        self.writer.write_all(&jpeg)?;
        if jpeg.len() % 2 != 0 {
            // RIFF chunks are word-aligned.
            self.writer.write_all(&[0])?;
        }

        self.frames.push((offset, jpeg.len() as u32));
        Ok(())
    }

    /// Write the index, patch header sizes, and flush. Returns the path.
    pub fn finalize(mut self) -> Result<PathBuf, RecorderError> {
        self.finalize_inner()?;
        Ok(self.path.clone())
    }

    fn finalize_inner(&mut self) -> Result<(), RecorderError> {
        if self.finalized {
            return Ok(());
        }

        let movi_end = self.writer.stream_position()?;

        // idx1: one entry per frame, offsets relative to the movi list fourcc.
        self.writer.write_all(b"idx1")?;
        self.writer
            .write_all(&((self.frames.len() * 16) as u32).to_le_bytes())?;
        for &(offset, size) in &self.frames {
            self.writer.write_all(b"00dc")?;
            self.writer.write_all(&AVIIF_KEYFRAME.to_le_bytes())?;
            // +4 skips the "movi" fourcc itself, per convention.
            self.writer.write_all(&(offset + 4).to_le_bytes())?;
            self.writer.write_all(&size.to_le_bytes())?;
        }
        let file_end = self.writer.stream_position()?;
        let n = self.frames.len() as u32;

        // Patch RIFF size, frame counts, and the movi list size.
        patch_u32(&mut self.writer, 4, (file_end - 8) as u32)?;
        patch_u32(&mut self.writer, TOTAL_FRAMES_POS, n)?;
        patch_u32(&mut self.writer, STREAM_LENGTH_POS, n)?;
        patch_u32(
            &mut self.writer,
            self.movi_start - 8,
            (movi_end - self.movi_start + 4) as u32,
        )?;

        self.writer.seek(SeekFrom::Start(file_end))?;
        self.writer.flush()?;
        self.finalized = true;

        tracing::info!(path = %self.path.display(), frames = n, "recording finalized");
        Ok(())
    }
}

impl Drop for VideoRecorder {
    fn drop(&mut self) {
        if !self.finalized {
            if let Err(e) = self.finalize_inner() {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to finalize recording on drop");
            }
        }
    }
}

// Byte offsets of the patched header fields, fixed by the layout below.
const TOTAL_FRAMES_POS: u64 = 48;
const STREAM_LENGTH_POS: u64 = 140;

fn patch_u32<W: Write + Seek>(w: &mut W, pos: u64, value: u32) -> std::io::Result<()> {
    w.seek(SeekFrom::Start(pos))?;
    w.write_all(&value.to_le_bytes())
}

/// RIFF/AVI header block: main header, one MJPG video stream, movi list
/// opening. Sizes that depend on the frame count are zeroed here and
/// patched in `finalize`.
fn write_headers<W: Write>(w: &mut W, width: u32, height: u32, fps: u32) -> std::io::Result<()> {
    // RIFF container
    w.write_all(b"RIFF")?;
    w.write_all(&0u32.to_le_bytes())?; // riff size, patched
    w.write_all(b"AVI ")?;

    // hdrl list: avih (8+56) + strl list (8+116)
    w.write_all(b"LIST")?;
    w.write_all(&(4 + 64 + 124u32).to_le_bytes())?;
    w.write_all(b"hdrl")?;

    // avih @ 24, data @ 32
    w.write_all(b"avih")?;
    w.write_all(&56u32.to_le_bytes())?;
    w.write_all(&(1_000_000 / fps).to_le_bytes())?; // microseconds per frame
    w.write_all(&0u32.to_le_bytes())?; // max bytes/sec
    w.write_all(&0u32.to_le_bytes())?; // padding granularity
    w.write_all(&AVIF_HASINDEX.to_le_bytes())?;
    w.write_all(&0u32.to_le_bytes())?; // total frames @ 48, patched
    w.write_all(&0u32.to_le_bytes())?; // initial frames
    w.write_all(&1u32.to_le_bytes())?; // stream count
    w.write_all(&0u32.to_le_bytes())?; // suggested buffer size
    w.write_all(&width.to_le_bytes())?;
    w.write_all(&height.to_le_bytes())?;
    w.write_all(&[0u8; 16])?; // reserved

    // strl list @ 96
    w.write_all(b"LIST")?;
    w.write_all(&116u32.to_le_bytes())?;
    w.write_all(b"strl")?;

    // strh @ 100, data @ 108
    w.write_all(b"strh")?;
    w.write_all(&56u32.to_le_bytes())?;
    w.write_all(b"vids")?;
    w.write_all(b"MJPG")?;
    w.write_all(&0u32.to_le_bytes())?; // flags
    w.write_all(&0u16.to_le_bytes())?; // priority
    w.write_all(&0u16.to_le_bytes())?; // language
    w.write_all(&0u32.to_le_bytes())?; // initial frames
    w.write_all(&1u32.to_le_bytes())?; // scale
    w.write_all(&fps.to_le_bytes())?; // rate (fps = rate/scale)
    w.write_all(&0u32.to_le_bytes())?; // start
    w.write_all(&0u32.to_le_bytes())?; // stream length @ 140, patched
    w.write_all(&0u32.to_le_bytes())?; // suggested buffer size
    w.write_all(&u32::MAX.to_le_bytes())?; // quality (default)
    w.write_all(&0u32.to_le_bytes())?; // sample size
    w.write_all(&0u16.to_le_bytes())?; // rcFrame left
    w.write_all(&0u16.to_le_bytes())?; // rcFrame top
    w.write_all(&(width as u16).to_le_bytes())?;
    w.write_all(&(height as u16).to_le_bytes())?;

    // strf: BITMAPINFOHEADER
    w.write_all(b"strf")?;
    w.write_all(&40u32.to_le_bytes())?;
    w.write_all(&40u32.to_le_bytes())?; // biSize
    w.write_all(&(width as i32).to_le_bytes())?;
    w.write_all(&(height as i32).to_le_bytes())?;
    w.write_all(&1u16.to_le_bytes())?; // planes
    w.write_all(&24u16.to_le_bytes())?; // bits per pixel
    w.write_all(b"MJPG")?; // compression
    w.write_all(&(width * height * 3).to_le_bytes())?; // image size
    w.write_all(&[0u8; 16])?; // resolution + palette fields

    // movi list; size patched once the last frame is in.
    w.write_all(b"LIST")?;
    w.write_all(&0u32.to_le_bytes())?;
    w.write_all(b"movi")?;

    Ok(())
}

//! 解码帧来源
//!
//! [`FrameSource`] yields frames in presentation order. The ffmpeg-backed
//! source pipes `rawvideo rgb24` from a child process.

use std::collections::VecDeque;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::Duration;

use log::{debug, info, warn};

use super::frame::{Frame, VideoInfo};
use super::probe::{self, ProbeReport};
use crate::core::error::{ExtractError, Result};
use crate::core::tools;

pub trait FrameSource {
    fn info(&self) -> &VideoInfo;

    /// `Ok(None)` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// ffprobe 结果（遥测流查找复用）
    fn probe_report(&self) -> Option<&ProbeReport> {
        None
    }
}

pub struct FfmpegFrameSource {
    info: VideoInfo,
    report: ProbeReport,
    child: Child,
    reader: BufReader<ChildStdout>,
    frame_number: u64,
    finished: bool,
}

impl FfmpegFrameSource {
    pub fn open(path: &Path) -> Result<Self> {
        let report = probe::probe(path)?;
        let info = report
            .video
            .clone()
            .ok_or_else(|| ExtractError::Decode(format!("{} has no video stream", path.display())))?;
        if info.width == 0 || info.height == 0 {
            return Err(ExtractError::InvalidFrameGeometry(format!(
                "{} reports {}x{}",
                path.display(),
                info.width,
                info.height
            )));
        }

        let mut child = Command::new(tools::ffmpeg_path())
            .args(["-v", "error", "-nostdin", "-i"])
            .arg(path)
            .args(["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ExtractError::Decode(format!("failed to start ffmpeg: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractError::Decode("ffmpeg stdout unavailable".to_string()))?;

        info!(
            "🎬 Decoding {}: {}x{} @ {:.3} fps",
            path.display(),
            info.width,
            info.height,
            info.fps
        );

        Ok(Self {
            info,
            report,
            child,
            reader: BufReader::with_capacity(1 << 20, stdout),
            frame_number: 0,
            finished: false,
        })
    }

    fn frame_len(&self) -> usize {
        self.info.width as usize * self.info.height as usize * 3
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        let status = self
            .child
            .wait()
            .map_err(|e| ExtractError::Decode(format!("ffmpeg wait failed: {}", e)))?;
        if !status.success() {
            return Err(ExtractError::Decode(format!(
                "ffmpeg exited with {} after {} frames",
                status, self.frame_number
            )));
        }
        debug!("ffmpeg finished after {} frames", self.frame_number);
        Ok(())
    }
}

/// Fill `buf` completely. `Ok(false)` on a clean end of stream before any byte.
fn read_frame(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(std::io::Error::new(ErrorKind::UnexpectedEof, "partial frame")),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

impl FrameSource for FfmpegFrameSource {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }

        let mut buf = vec![0u8; self.frame_len()];
        match read_frame(&mut self.reader, &mut buf) {
            Ok(true) => {}
            Ok(false) => {
                self.finish()?;
                return Ok(None);
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                warn!("Truncated last frame after {} frames", self.frame_number);
                self.finish()?;
                return Ok(None);
            }
            Err(e) => return Err(ExtractError::Decode(format!("reading ffmpeg output: {}", e))),
        }

        let timestamp = Duration::from_secs_f64(self.frame_number as f64 / self.info.fps.max(1e-3));
        let frame = Frame {
            width: self.info.width,
            height: self.info.height,
            data: buf,
            timestamp,
            frame_number: self.frame_number,
        };
        self.frame_number += 1;
        Ok(Some(frame))
    }

    fn probe_report(&self) -> Option<&ProbeReport> {
        Some(&self.report)
    }
}

impl Drop for FfmpegFrameSource {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// 内存帧来源（测试与嵌入调用）
pub struct MemoryFrameSource {
    info: VideoInfo,
    frames: VecDeque<Frame>,
    fail_at: Option<u64>,
    served: u64,
}

impl MemoryFrameSource {
    pub fn new(info: VideoInfo, frames: Vec<Frame>) -> Self {
        Self {
            info,
            frames: frames.into(),
            fail_at: None,
            served: 0,
        }
    }

    /// 尺寸取第一帧
    pub fn from_frames(fps: f64, frames: Vec<Frame>) -> Self {
        let (width, height) = frames.first().map_or((0, 0), |f| (f.width, f.height));
        let info = VideoInfo {
            width,
            height,
            fps,
            frame_count: Some(frames.len() as u64),
            duration: Some(frames.len() as f64 / fps),
        };
        Self::new(info, frames)
    }

    /// 第 `index` 次读取时返回解码错误
    pub fn fail_at(mut self, index: u64) -> Self {
        self.fail_at = Some(index);
        self
    }
}

impl FrameSource for MemoryFrameSource {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.fail_at == Some(self.served) {
            return Err(ExtractError::Decode(format!("corrupt packet at frame {}", self.served)));
        }
        self.served += 1;
        Ok(self.frames.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_frame_boundaries() {
        let data = vec![7u8; 10];
        let mut reader = &data[..];
        let mut buf = [0u8; 4];
        assert!(read_frame(&mut reader, &mut buf).unwrap());
        assert!(read_frame(&mut reader, &mut buf).unwrap());
        let err = read_frame(&mut reader, &mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
        assert!(!read_frame(&mut reader, &mut buf).unwrap());
    }

    #[test]
    fn test_memory_source() {
        let frames = (0..3).map(|i| Frame::new(4, 2, vec![0u8; 24], i * 100, i)).collect();
        let mut source = MemoryFrameSource::from_frames(10.0, frames);
        assert_eq!(source.info().width, 4);
        assert_eq!(source.info().estimated_frames(), 3);
        let mut seen = 0;
        while let Some(frame) = source.next_frame().unwrap() {
            assert_eq!(frame.frame_number, seen);
            seen += 1;
        }
        assert_eq!(seen, 3);
    }

    #[test]
    fn test_memory_source_failure() {
        let frames = (0..3).map(|i| Frame::new(4, 2, vec![0u8; 24], i * 100, i)).collect();
        let mut source = MemoryFrameSource::from_frames(10.0, frames).fail_at(1);
        assert!(source.next_frame().unwrap().is_some());
        assert!(matches!(source.next_frame(), Err(ExtractError::Decode(_))));
    }
}

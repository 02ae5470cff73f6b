// FFmpeg adapter - Decoding frame source and MPEG-4 writer built on ffmpeg-next
//
// Only compiled with the `ffmpeg` feature.

use std::path::{Path, PathBuf};

use chrono::Utc;
use ffmpeg_next as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling::{self, flag::Flags};
use ffmpeg::Rational;
use tracing::{debug, info, warn};

use crate::adapters::toml_config::DEFAULT_FPS;
use crate::domain::model::{Frame, StreamInfo};
use crate::error::{EventCamError, EventCamResult};
use crate::ports::{FrameSource, FrameWriter, OutputRequest, SourceEvent, WriterFactory};
use crate::utils::path::{ensure_directory, parent_or_current};

/// Initialize FFmpeg once per process
pub fn init() -> EventCamResult<()> {
    ffmpeg::init()?;
    Ok(())
}

/// Decodes a file or camera URL into RGB24 frames
pub struct FfmpegSource {
    name: String,
    info: StreamInfo,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::decoder::Video,
    scaler: scaling::Context,
    decoded: ffmpeg::frame::Video,
    rgb: ffmpeg::frame::Video,
    drained: bool,
    next: u64,
}

impl FfmpegSource {
    pub fn open(name: &str, url: &str) -> EventCamResult<Self> {
        init()?;
        let input = ffmpeg::format::input(&url)?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or(ffmpeg::Error::StreamNotFound)?;
        let stream_index = stream.index();
        let rate = stream.avg_frame_rate();
        let fps = if rate.denominator() > 0 && rate.numerator() > 0 {
            (rate.numerator() as f64 / rate.denominator() as f64).round().max(1.0) as u32
        } else {
            warn!(stream = name, "Source reports no frame rate, assuming {} fps", DEFAULT_FPS);
            DEFAULT_FPS
        };

        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = context.decoder().video()?;
        let info = StreamInfo::new(fps, decoder.width(), decoder.height())?;
        let scaler = scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            Flags::BILINEAR,
        )?;

        info!(stream = name, fps, width = info.width, height = info.height, "Opened {}", url);
        Ok(Self {
            name: name.to_string(),
            info,
            input,
            stream_index,
            decoder,
            scaler,
            decoded: ffmpeg::frame::Video::empty(),
            rgb: ffmpeg::frame::Video::empty(),
            drained: false,
            next: 0,
        })
    }

    fn decode_next(&mut self) -> Result<Option<Vec<u8>>, ffmpeg::Error> {
        loop {
            if self.decoder.receive_frame(&mut self.decoded).is_ok() {
                self.scaler.run(&self.decoded, &mut self.rgb)?;
                return Ok(Some(packed_rgb(&self.rgb)));
            }
            if self.drained {
                return Ok(None);
            }
            match self.input.packets().next() {
                Some((stream, packet)) => {
                    if stream.index() == self.stream_index {
                        self.decoder.send_packet(&packet)?;
                    }
                }
                None => {
                    self.decoder.send_eof()?;
                    self.drained = true;
                }
            }
        }
    }
}

/// Copy plane 0 of an RGB24 frame without its row padding
fn packed_rgb(frame: &ffmpeg::frame::Video) -> Vec<u8> {
    let row_bytes = frame.width() as usize * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);
    if stride == row_bytes {
        return data[..row_bytes * frame.height() as usize].to_vec();
    }
    let mut pixels = Vec::with_capacity(row_bytes * frame.height() as usize);
    for row in data.chunks(stride).take(frame.height() as usize) {
        pixels.extend_from_slice(&row[..row_bytes.min(row.len())]);
    }
    pixels
}

impl FrameSource for FfmpegSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn info(&self) -> StreamInfo {
        self.info
    }

    fn next_event(&mut self) -> SourceEvent {
        let index = self.next;
        match self.decode_next() {
            Ok(Some(pixels)) => {
                self.next += 1;
                SourceEvent::Frame(Frame::new(index, Utc::now(), self.info.width, self.info.height, pixels))
            }
            Ok(None) => SourceEvent::EndOfStream,
            Err(ffmpeg::Error::Eof) => SourceEvent::EndOfStream,
            Err(e) => {
                self.next += 1;
                SourceEvent::ReadFailure {
                    index,
                    message: e.to_string(),
                }
            }
        }
    }
}

/// Writes MPEG-4 video through a hidden temporary file renamed on finish
pub struct Mp4Writer {
    path: PathBuf,
    temp_path: PathBuf,
    output: ffmpeg::format::context::Output,
    encoder: ffmpeg::encoder::Video,
    scaler: scaling::Context,
    stream_index: usize,
    time_base: Rational,
    info: StreamInfo,
    frames_written: u64,
    published: bool,
}

impl Mp4Writer {
    pub fn create(request: &OutputRequest) -> EventCamResult<Self> {
        init()?;
        let dir = parent_or_current(&request.path);
        ensure_directory(&dir)?;
        let file_name = request
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "clip.mp4".to_string());
        let temp_path = dir.join(format!(".partial_{}", file_name));

        let info = request.info;
        let fps = info.fps as i32;
        let time_base = Rational::new(1, fps);

        let mut output = ffmpeg::format::output(&temp_path)?;
        let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::MPEG4).ok_or(ffmpeg::Error::EncoderNotFound)?;
        let global_header = output.format().flags().contains(ffmpeg::format::Flags::GLOBAL_HEADER);

        let mut stream = output.add_stream(codec)?;
        let mut encoder = ffmpeg::codec::context::Context::new_with_codec(codec).encoder().video()?;
        encoder.set_width(info.width);
        encoder.set_height(info.height);
        encoder.set_format(Pixel::YUV420P);
        encoder.set_time_base(time_base);
        encoder.set_frame_rate(Some(Rational::new(fps, 1)));
        if global_header {
            encoder.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        }
        let encoder = encoder.open_as(codec)?;
        stream.set_parameters(&encoder);
        stream.set_time_base(time_base);
        let stream_index = stream.index();
        output.write_header()?;

        let scaler = scaling::Context::get(
            Pixel::RGB24,
            info.width,
            info.height,
            Pixel::YUV420P,
            info.width,
            info.height,
            Flags::BILINEAR,
        )?;

        debug!(path = %request.path.display(), "Opened MPEG-4 writer");
        Ok(Self {
            path: request.path.clone(),
            temp_path,
            output,
            encoder,
            scaler,
            stream_index,
            time_base,
            info,
            frames_written: 0,
            published: false,
        })
    }

    fn drain(&mut self) -> EventCamResult<()> {
        let stream_time_base = self
            .output
            .stream(self.stream_index)
            .map(|s| s.time_base())
            .unwrap_or(self.time_base);
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.time_base, stream_time_base);
            packet.write_interleaved(&mut self.output)?;
        }
        Ok(())
    }
}

impl FrameWriter for Mp4Writer {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write_frame(&mut self, frame: &Frame) -> EventCamResult<()> {
        if frame.byte_len() != self.info.frame_bytes() {
            return Err(EventCamError::WriterWriteFailed {
                slot: 0,
                message: format!(
                    "frame {} has {} bytes, writer expects {}",
                    frame.index(),
                    frame.byte_len(),
                    self.info.frame_bytes()
                ),
            });
        }

        let mut rgb = ffmpeg::frame::Video::new(Pixel::RGB24, self.info.width, self.info.height);
        let row_bytes = self.info.width as usize * 3;
        let stride = rgb.stride(0);
        let plane = rgb.data_mut(0);
        for (row, src) in frame.pixels().chunks(row_bytes).enumerate() {
            plane[row * stride..row * stride + row_bytes].copy_from_slice(src);
        }

        let mut yuv = ffmpeg::frame::Video::empty();
        self.scaler.run(&rgb, &mut yuv)?;
        yuv.set_pts(Some(self.frames_written as i64));
        self.encoder.send_frame(&yuv)?;
        self.drain()?;
        self.frames_written += 1;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn finish(mut self: Box<Self>) -> EventCamResult<PathBuf> {
        self.encoder.send_eof()?;
        self.drain()?;
        self.output.write_trailer()?;
        std::fs::rename(&self.temp_path, &self.path)?;
        self.published = true;
        Ok(self.path.clone())
    }
}

impl Drop for Mp4Writer {
    fn drop(&mut self) {
        if !self.published {
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}

/// Factory for MPEG-4 writers
#[derive(Debug, Default, Clone)]
pub struct Mp4WriterFactory;

impl WriterFactory for Mp4WriterFactory {
    fn extension(&self) -> &str {
        "mp4"
    }

    fn open(&self, request: &OutputRequest) -> EventCamResult<Box<dyn FrameWriter>> {
        Ok(Box::new(Mp4Writer::create(request)?))
    }
}

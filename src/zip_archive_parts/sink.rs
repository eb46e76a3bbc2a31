//! Per-entry data path: CRC and byte accounting, with optional raw deflate compression.

use std::io::Write;

use derivative::Derivative;
use flate2::{Compress, Crc, FlushCompress, Status};

use crate::{
    error::{Result, ZipError},
    level::CompressionLevel,
    CompressionType,
};

/// Size of the compressed output buffer a deflate sink drains through.
pub(crate) const DEFLATE_BUFFER_SIZE: usize = 32 * 1024;

#[derive(Derivative)]
#[derivative(Debug)]
enum Encoder {
    Stored,
    Deflate {
        level: CompressionLevel,
        #[derivative(Debug = "ignore")]
        compress: Compress,
        #[derivative(Debug = "ignore")]
        buffer: Vec<u8>,
    },
}

/// Receives the data of a single entry and forwards it, stored or deflated, to the archive
/// output.
///
/// The CRC is always computed over the uncompressed bytes. `total_in` counts bytes given to
/// [`write`](Self::write), `total_out` bytes forwarded to the output. Deflate output is only
/// complete after [`finish`](Self::finish).
#[derive(Derivative)]
#[derivative(Debug)]
pub struct EntrySink {
    #[derivative(Debug = "ignore")]
    crc: Crc,
    total_in: u64,
    total_out: u64,
    finished: bool,
    encoder: Encoder,
}

impl EntrySink {
    /// Pass-through sink for stored entries.
    pub fn stored() -> Self {
        Self::with_encoder(Encoder::Stored)
    }

    /// Raw deflate (no zlib wrapper) sink.
    pub fn deflate(level: CompressionLevel) -> Self {
        Self::deflate_with(
            level,
            Compress::new(level.into(), false),
            vec![0; DEFLATE_BUFFER_SIZE],
        )
    }

    fn deflate_with(level: CompressionLevel, compress: Compress, buffer: Vec<u8>) -> Self {
        Self::with_encoder(Encoder::Deflate {
            level,
            compress,
            buffer,
        })
    }

    fn with_encoder(encoder: Encoder) -> Self {
        Self {
            crc: Crc::new(),
            total_in: 0,
            total_out: 0,
            finished: false,
            encoder,
        }
    }

    pub fn compression_type(&self) -> CompressionType {
        match self.encoder {
            Encoder::Stored => CompressionType::Stored,
            Encoder::Deflate { .. } => CompressionType::Deflate,
        }
    }

    /// CRC-32 of everything written so far.
    pub fn crc(&self) -> u32 {
        self.crc.sum()
    }

    pub fn total_in(&self) -> u64 {
        self.total_in
    }

    pub fn total_out(&self) -> u64 {
        self.total_out
    }

    pub fn write<W: Write>(&mut self, data: &[u8], out: &mut W) -> Result<()> {
        if self.finished {
            return Err(ZipError::illegal_state("entry data already finished"));
        }
        if data.is_empty() {
            return Ok(());
        }
        self.crc.update(data);
        self.total_in += data.len() as u64;
        match &mut self.encoder {
            Encoder::Stored => {
                out.write_all(data)?;
                self.total_out += data.len() as u64;
            }
            Encoder::Deflate {
                compress, buffer, ..
            } => {
                self.total_out += run_deflate(compress, buffer, data, FlushCompress::None, out)?;
            }
        }
        Ok(())
    }

    /// Flushes whatever the compressor still buffers and finalizes the deflate stream.
    /// Calling it again has no effect.
    pub fn finish<W: Write>(&mut self, out: &mut W) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        if let Encoder::Deflate {
            compress, buffer, ..
        } = &mut self.encoder
        {
            self.total_out += run_deflate(compress, buffer, &[], FlushCompress::Finish, out)?;
        }
        self.finished = true;
        Ok(())
    }
}

/// Feeds `input` through the compressor, forwarding produced bytes to `out`. Returns the number
/// of bytes forwarded.
fn run_deflate<W: Write>(
    compress: &mut Compress,
    buffer: &mut [u8],
    mut input: &[u8],
    flush: FlushCompress,
    out: &mut W,
) -> Result<u64> {
    let mut forwarded = 0;
    loop {
        let before_in = compress.total_in();
        let before_out = compress.total_out();
        let status = compress.compress(input, buffer, flush)?;
        let consumed = (compress.total_in() - before_in) as usize;
        let produced = (compress.total_out() - before_out) as usize;

        out.write_all(&buffer[..produced])?;
        forwarded += produced as u64;
        input = &input[consumed..];

        let done = match flush {
            FlushCompress::Finish => status == Status::StreamEnd,
            _ => input.is_empty(),
        };
        if done {
            return Ok(forwarded);
        }
        if consumed == 0 && produced == 0 {
            return Err(std::io::Error::other("deflate compressor made no progress").into());
        }
    }
}

/// Compressor state and output buffer kept by a writer between deflated entries.
#[derive(Derivative)]
#[derivative(Debug)]
pub(crate) struct DeflatePool {
    #[derivative(Debug = "ignore")]
    compress: Option<(CompressionLevel, Compress)>,
    buffer: Vec<u8>,
}

impl DeflatePool {
    pub(crate) fn new() -> Self {
        Self {
            compress: None,
            buffer: vec![0; DEFLATE_BUFFER_SIZE],
        }
    }

    /// A deflate sink built from the pooled compressor if its level matches.
    pub(crate) fn take(&mut self, level: CompressionLevel) -> EntrySink {
        let compress = match self.compress.take() {
            Some((pooled_level, mut compress)) if pooled_level == level => {
                compress.reset();
                compress
            }
            _ => Compress::new(level.into(), false),
        };
        let mut buffer = std::mem::take(&mut self.buffer);
        if buffer.len() < DEFLATE_BUFFER_SIZE {
            buffer.resize(DEFLATE_BUFFER_SIZE, 0);
        }
        EntrySink::deflate_with(level, compress, buffer)
    }

    /// Returns the compressor and buffer of a finished deflate sink to the pool.
    pub(crate) fn give_back(&mut self, sink: EntrySink) {
        if let Encoder::Deflate {
            level,
            compress,
            buffer,
        } = sink.encoder
        {
            self.compress = Some((level, compress));
            self.buffer = buffer;
        }
    }
}

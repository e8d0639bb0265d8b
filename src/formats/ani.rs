// Windows animated cursor (.ani): a RIFF "ACON" form whose frames are .cur files

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, warn};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use super::Detection;
use super::bounded::{BoundedReader, CountingReader};
use super::cur::{CurReader, CurWriter, ImageCollector};
use crate::error::{CursorError, Result, format_err};
use crate::model::{CursorData, CursorFrame, CursorImage};

pub type FourCc = [u8; 4];

pub const RIFF: &FourCc = b"RIFF";
pub const ACON: &FourCc = b"ACON";
pub const LIST: &FourCc = b"LIST";
pub const ANIH: &FourCc = b"anih";
pub const RATE: &FourCc = b"rate";
pub const SEQ: &FourCc = b"seq ";
pub const FRAM: &FourCc = b"fram";
pub const ICON: &FourCc = b"icon";
pub const INFO: &FourCc = b"INFO";
pub const INAM: &FourCc = b"INAM";
pub const IART: &FourCc = b"IART";

const ANIH_LEN: u32 = 36;

/// Frames are stored as icon/cursor resources rather than raw bitmaps.
pub const AF_ICON: u32 = 0x1;
/// A `seq ` chunk defines the step order.
pub const AF_SEQUENCE: u32 = 0x2;

pub fn fourcc_str(id: &FourCc) -> String {
    String::from_utf8_lossy(id).into_owned()
}

/// Converts a delay in milliseconds to 1/60 s jiffies, never rounding a
/// non-zero delay down to zero.
pub fn ms_to_jiffies(ms: u32) -> u32 {
    let jiffies = (ms as u64 * 60 + 500) / 1000;
    if ms > 0 { jiffies.max(1) as u32 } else { 0 }
}

pub fn jiffies_to_ms(jiffies: u32) -> u32 {
    ((jiffies as u64 * 1000 + 30) / 60) as u32
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AniHeader {
    pub frames: u32,
    pub steps: u32,
    pub width: u32,
    pub height: u32,
    pub bit_count: u32,
    pub planes: u32,
    /// Default step duration in jiffies.
    pub display_rate: u32,
    pub flags: u32,
}

impl AniHeader {
    pub fn has_icon_frames(&self) -> bool {
        self.flags & AF_ICON != 0
    }

    pub fn has_sequence(&self) -> bool {
        self.flags & AF_SEQUENCE != 0
    }
}

/// Structural events of an animated cursor, in file order.
pub trait AniContentHandler {
    fn header(&mut self, _header: &AniHeader) -> Result<()> {
        Ok(())
    }

    /// Entering a `LIST` of the given type.
    fn list(&mut self, _list_type: &FourCc) -> Result<()> {
        Ok(())
    }

    /// Any chunk without a dedicated callback (INFO strings, unknown chunks).
    fn chunk(&mut self, id: &FourCc, _data: &mut dyn Read) -> Result<()> {
        debug!("skipping chunk {:?}", fourcc_str(id));
        Ok(())
    }

    fn rates(&mut self, _rates: &[u32]) -> Result<()> {
        Ok(())
    }

    fn sequence(&mut self, _steps: &[u32]) -> Result<()> {
        Ok(())
    }

    /// `data` covers exactly the icon chunk's payload; the pad byte that keeps
    /// chunks word-aligned is consumed by the parser.
    fn frame(&mut self, index: u32, data: &mut dyn Read) -> Result<()>;
}

pub struct AniReader;

impl AniReader {
    /// Peeks the RIFF form header.
    pub fn detect<R: Read>(mut reader: R) -> Detection {
        let mut head = [0u8; 12];
        match reader.read_exact(&mut head) {
            Ok(()) if &head[0..4] == RIFF && &head[8..12] == ACON => Detection::ThisFormat,
            Ok(()) => Detection::NotThisFormat,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Detection::NotThisFormat,
            Err(e) => Detection::ParseError(e.into()),
        }
    }

    pub fn parse<R, H>(reader: R, handler: &mut H) -> Result<()>
    where
        R: Read,
        H: AniContentHandler + ?Sized,
    {
        let mut reader = CountingReader::new(reader);

        let signature = read_id(&mut reader, "RIFF header")?;
        if &signature != RIFF {
            format_err!("missing RIFF signature");
        }
        let riff_size = read_u32(&mut reader, "RIFF header")?;
        let form = read_id(&mut reader, "RIFF header")?;
        if &form != ACON {
            format_err!("RIFF form is {:?}, not an animated cursor", fourcc_str(&form));
        }

        let end = 8 + riff_size as u64;
        let mut header_seen = false;
        while reader.position() + 8 <= end {
            let Some((id, size)) = read_chunk_header(&mut reader)? else {
                debug!("RIFF size exceeds file, stopping at {}", reader.position());
                break;
            };
            match &id {
                ANIH => {
                    let header = read_anih(&mut reader, size)?;
                    if !header.has_icon_frames() {
                        format_err!("raw bitmap frames are not supported");
                    }
                    handler.header(&header)?;
                    header_seen = true;
                }
                RATE | SEQ => {
                    let values = read_u32_table(&mut reader, size)?;
                    if &id == RATE {
                        handler.rates(&values)?;
                    } else {
                        handler.sequence(&values)?;
                    }
                }
                LIST => {
                    if size < 4 {
                        format_err!("LIST chunk of {size} bytes has no type");
                    }
                    let list_type = read_id(&mut reader, "LIST type")?;
                    handler.list(&list_type)?;
                    let mut body = BoundedReader::new(&mut reader, size as u64 - 4);
                    if &list_type == FRAM {
                        if !header_seen {
                            format_err!("frame list precedes the anih header");
                        }
                        walk_list(&mut body, handler, true)?;
                    } else {
                        if &list_type != INFO {
                            warn!("ignoring unknown LIST type {:?}", fourcc_str(&list_type));
                        }
                        walk_list(&mut body, handler, false)?;
                    }
                    body.finish()
                        .map_err(|e| CursorError::from_read(e, "LIST chunk"))?;
                }
                _ => {
                    warn!("ignoring unknown chunk {:?} ({size} bytes)", fourcc_str(&id));
                    let mut data = BoundedReader::new(&mut reader, size as u64);
                    handler.chunk(&id, &mut data)?;
                    data.finish()
                        .map_err(|e| CursorError::from_read(e, "chunk"))?;
                }
            }
            if size % 2 == 1 && reader.position() < end {
                skip_pad(&mut reader)?;
            }
        }

        if !header_seen {
            format_err!("missing anih header chunk");
        }
        Ok(())
    }

    pub fn read<R: Read>(reader: R) -> Result<AniCursor> {
        let mut cursor = AniCursor::default();
        Self::parse(reader, &mut cursor)?;
        if cursor.header.frames as usize != cursor.frames.len() {
            warn!(
                "header declares {} frames, file contains {}",
                cursor.header.frames,
                cursor.frames.len()
            );
        }
        Ok(cursor)
    }

    pub fn read_file<P: AsRef<Path>>(path: P) -> Result<AniCursor> {
        let file = fs::File::open(path)?;
        Self::read(BufReader::new(file))
    }
}

/// Walks the chunks of a LIST body. In a frame list, `icon` chunks go to
/// [`AniContentHandler::frame`].
fn walk_list<Rd, H>(body: &mut BoundedReader<'_, Rd>, handler: &mut H, frames: bool) -> Result<()>
where
    Rd: Read + ?Sized,
    H: AniContentHandler + ?Sized,
{
    let mut index = 0;
    while body.remaining() >= 8 {
        let id = read_id(body, "list entry")?;
        let size = read_u32(body, "list entry")?;
        let mut data = BoundedReader::new(&mut *body, size as u64);
        if frames && &id == ICON {
            handler.frame(index, &mut data)?;
            index += 1;
        } else {
            if frames {
                warn!("unexpected {:?} chunk in frame list", fourcc_str(&id));
            }
            handler.chunk(&id, &mut data)?;
        }
        data.finish()
            .map_err(|e| CursorError::from_read(e, "list entry"))?;
        if size % 2 == 1 && body.remaining() > 0 {
            skip_pad(body)?;
        }
    }
    Ok(())
}

fn read_id<R: Read + ?Sized>(reader: &mut R, what: &str) -> Result<FourCc> {
    let mut id = [0u8; 4];
    reader
        .read_exact(&mut id)
        .map_err(|e| CursorError::from_read(e, what))?;
    Ok(id)
}

fn read_u32<R: Read + ?Sized>(reader: &mut R, what: &str) -> Result<u32> {
    reader
        .read_u32::<LittleEndian>()
        .map_err(|e| CursorError::from_read(e, what))
}

/// `None` on a clean end of stream before the next chunk.
fn read_chunk_header<R: Read>(reader: &mut CountingReader<R>) -> Result<Option<(FourCc, u32)>> {
    let mut id = [0u8; 4];
    let mut filled = 0;
    while filled < id.len() {
        match reader.read(&mut id[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => format_err!("truncated chunk header"),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    let size = read_u32(reader, "chunk header")?;
    Ok(Some((id, size)))
}

fn skip_pad<R: Read + ?Sized>(reader: &mut R) -> Result<()> {
    let mut pad = [0u8; 1];
    reader
        .read_exact(&mut pad)
        .map_err(|e| CursorError::from_read(e, "chunk padding"))
}

fn read_anih<R: Read>(reader: &mut CountingReader<R>, size: u32) -> Result<AniHeader> {
    if size < ANIH_LEN {
        format_err!("anih chunk is {size} bytes, expected {ANIH_LEN}");
    }
    let mut data = BoundedReader::new(reader, size as u64);
    let mut fields = [0u32; 9];
    for field in fields.iter_mut() {
        *field = read_u32(&mut data, "anih header")?;
    }
    data.finish()
        .map_err(|e| CursorError::from_read(e, "anih header"))?;
    if fields[0] != ANIH_LEN {
        warn!("anih declares size {}, expected {ANIH_LEN}", fields[0]);
    }
    Ok(AniHeader {
        frames: fields[1],
        steps: fields[2],
        width: fields[3],
        height: fields[4],
        bit_count: fields[5],
        planes: fields[6],
        display_rate: fields[7],
        flags: fields[8],
    })
}

fn read_u32_table<R: Read>(reader: &mut CountingReader<R>, size: u32) -> Result<Vec<u32>> {
    if size % 4 != 0 {
        warn!("table chunk size {size} is not a multiple of 4");
    }
    let mut data = BoundedReader::new(reader, size as u64);
    let mut values = Vec::with_capacity(size as usize / 4);
    for _ in 0..size / 4 {
        values.push(read_u32(&mut data, "table chunk")?);
    }
    data.finish()
        .map_err(|e| CursorError::from_read(e, "table chunk"))?;
    Ok(values)
}

/// A decoded animated cursor, before sequence expansion.
#[derive(Debug, Clone, Default)]
pub struct AniCursor {
    pub header: AniHeader,
    pub frames: Vec<Vec<CursorImage>>,
    pub rates: Option<Vec<u32>>,
    pub sequence: Option<Vec<u32>>,
    pub title: Option<String>,
    pub artist: Option<String>,
}

impl AniContentHandler for AniCursor {
    fn header(&mut self, header: &AniHeader) -> Result<()> {
        self.header = *header;
        Ok(())
    }

    fn chunk(&mut self, id: &FourCc, data: &mut dyn Read) -> Result<()> {
        if id != INAM && id != IART {
            return Ok(());
        }
        let mut raw = Vec::new();
        data.read_to_end(&mut raw)
            .map_err(|e| CursorError::from_read(e, "INFO string"))?;
        let text = String::from_utf8_lossy(&raw)
            .trim_end_matches('\0')
            .to_string();
        if id == INAM {
            self.title = Some(text);
        } else {
            self.artist = Some(text);
        }
        Ok(())
    }

    fn rates(&mut self, rates: &[u32]) -> Result<()> {
        self.rates = Some(rates.to_vec());
        Ok(())
    }

    fn sequence(&mut self, steps: &[u32]) -> Result<()> {
        self.sequence = Some(steps.to_vec());
        Ok(())
    }

    fn frame(&mut self, index: u32, data: &mut dyn Read) -> Result<()> {
        let mut images = ImageCollector::default();
        CurReader::parse(data, &mut images)?;
        debug!("ani frame {index}: {} images", images.images.len());
        self.frames.push(images.images);
        Ok(())
    }
}

impl AniCursor {
    /// Expands the step sequence into played frames numbered from 1, with
    /// delays in milliseconds.
    pub fn to_cursor_data(&self) -> Result<CursorData> {
        let order: Vec<u32> = match &self.sequence {
            Some(seq) => seq.clone(),
            None => (0..self.frames.len() as u32).collect(),
        };
        if self.sequence.is_some() && self.header.steps as usize != order.len() {
            format_err!(
                "sequence has {} steps, header declares {}",
                order.len(),
                self.header.steps
            );
        }
        if let Some(rates) = &self.rates {
            if rates.len() != order.len() {
                format_err!(
                    "rate table has {} entries for {} steps",
                    rates.len(),
                    order.len()
                );
            }
        }

        let mut frames = Vec::with_capacity(order.len());
        for (step, &index) in order.iter().enumerate() {
            let Some(images) = self.frames.get(index as usize) else {
                format_err!("step {step} refers to missing frame {index}");
            };
            let jiffies = self
                .rates
                .as_ref()
                .map_or(self.header.display_rate, |r| r[step]);
            frames.push(CursorFrame {
                number: step as u32 + 1,
                images: images.clone(),
                delay_ms: jiffies_to_ms(jiffies),
            });
        }
        Ok(CursorData::new(frames))
    }
}

/// Accumulates frames keyed by number and serializes a `.ani` file.
#[derive(Debug, Clone, Default)]
pub struct AniWriter {
    frames: BTreeMap<u32, (CurWriter, u32)>,
    display_rate_ms: Option<u32>,
    title: Option<String>,
    artist: Option<String>,
}

impl AniWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from the frames of an existing file (sequence expanded).
    pub fn from_cursor(cursor: CursorData) -> Self {
        let mut writer = Self::new();
        for frame in cursor.frames {
            for image in frame.images {
                writer.add_image(frame.number.max(1), image, frame.delay_ms);
            }
        }
        writer
    }

    /// Default step duration; frames whose delay differs get a `rate` table.
    pub fn set_display_rate_ms(&mut self, ms: u32) {
        self.display_rate_ms = Some(ms);
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = Some(title.into());
    }

    pub fn set_artist(&mut self, artist: impl Into<String>) {
        self.artist = Some(artist.into());
    }

    pub fn add_image(&mut self, frame: u32, image: CursorImage, delay_ms: u32) {
        let entry = self
            .frames
            .entry(frame)
            .or_insert_with(|| (CurWriter::new(), delay_ms));
        entry.0.add_image(image);
        entry.1 = delay_ms;
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Frame numbers must run 1..=N without gaps.
    fn check_complete(&self) -> Result<()> {
        if self.frames.is_empty() {
            return Err(CursorError::state("animated cursor has no frames"));
        }
        for (expected, &number) in (1u32..).zip(self.frames.keys()) {
            if number != expected {
                return Err(CursorError::state(format!(
                    "frame {expected} is missing (next frame is {number})"
                )));
            }
        }
        Ok(())
    }

    pub fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        self.check_complete()?;

        let rates: Vec<u32> = self
            .frames
            .values()
            .map(|(_, delay)| ms_to_jiffies(*delay))
            .collect();
        let display_rate = self
            .display_rate_ms
            .map(ms_to_jiffies)
            .unwrap_or(rates[0]);
        let uniform = rates.iter().all(|&r| r == display_rate);

        let mut body = Vec::new();
        body.write_all(ACON)?;

        if self.title.is_some() || self.artist.is_some() {
            let mut info = Vec::new();
            info.write_all(INFO)?;
            if let Some(title) = &self.title {
                write_chunk(&mut info, INAM, &nul_terminated(title))?;
            }
            if let Some(artist) = &self.artist {
                write_chunk(&mut info, IART, &nul_terminated(artist))?;
            }
            write_chunk(&mut body, LIST, &info)?;
        }

        let count = self.frames.len() as u32;
        let mut anih = Vec::with_capacity(ANIH_LEN as usize);
        for value in [ANIH_LEN, count, count, 0, 0, 0, 0, display_rate, AF_ICON] {
            anih.write_u32::<LittleEndian>(value)?;
        }
        write_chunk(&mut body, ANIH, &anih)?;

        if !uniform {
            let mut table = Vec::with_capacity(rates.len() * 4);
            for rate in &rates {
                table.write_u32::<LittleEndian>(*rate)?;
            }
            write_chunk(&mut body, RATE, &table)?;
        }

        let mut list = Vec::new();
        list.write_all(FRAM)?;
        for (cur, _) in self.frames.values() {
            write_chunk(&mut list, ICON, &cur.to_bytes()?)?;
        }
        write_chunk(&mut body, LIST, &list)?;

        writer.write_all(RIFF)?;
        writer.write_u32::<LittleEndian>(body.len() as u32)?;
        writer.write_all(&body)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write(&mut out)?;
        Ok(out)
    }
}

fn nul_terminated(text: &str) -> Vec<u8> {
    let mut bytes = text.as_bytes().to_vec();
    bytes.push(0);
    bytes
}

/// Writes a chunk, padding its payload to an even length.
fn write_chunk(out: &mut Vec<u8>, id: &FourCc, data: &[u8]) -> Result<()> {
    out.write_all(id)?;
    out.write_u32::<LittleEndian>(data.len() as u32)?;
    out.write_all(data)?;
    if data.len() % 2 == 1 {
        out.write_u8(0)?;
    }
    Ok(())
}

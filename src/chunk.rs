//! Byte-range chunking for large, repetitive XML streams.
//!
//! This module locates the exact byte boundaries of repeated elements inside
//! a seekable XML stream so that bulk processing can work on file segments
//! without loading the whole document or building a parse tree. A scan seeks
//! to an absolute offset, tokenizes forward with [`quick_xml::Reader`], and
//! converts the decoder's running position back into stream offsets.
//!
//! The main entry points are [`chunk`], which returns the byte range of a
//! single element occurrence, and [`chunk_all`], which partitions the whole
//! stream into ordered segments each holding at least a requested minimum
//! number of target elements.
//!
//! # Example
//!
//! ```
//! use std::io::Cursor;
//! use longan::chunk_all;
//!
//! let xml = "<library><book>b1</book><book>b2</book><book>b3</book><book>b4</book></library>";
//! let mut stream = Cursor::new(xml.as_bytes());
//!
//! let segments = chunk_all(&mut stream, "book", 2)?;
//! assert_eq!(segments.len(), 2);
//! assert!(xml[segments[0].range_usize()].starts_with("<book>"));
//! # Ok::<(), longan::Error>(())
//! ```
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::ops::Range;

use quick_xml::Reader;
use quick_xml::events::Event;
use rand::RngExt;

use crate::error::{Error, Result};

/// Number of sampling probes used by [`chunk_all`] to estimate the average
/// element size.
const SIZE_PROBES: usize = 10;

/// A half-open byte range `[start, stop)` into a specific stream, containing
/// one or more complete target elements with no partial element at either
/// edge.
///
/// Segments returned by [`chunk_all`] are ordered by `start`, non-overlapping,
/// and jointly cover every target element in the stream exactly once. The
/// caller is responsible for slicing the actual bytes out of the original
/// stream or its backing storage, either directly or via
/// [`Segment::read_from`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Absolute offset of the first byte of the segment
    pub start: u64,
    /// Absolute offset one past the last byte of the segment
    pub stop: u64,
}

impl Segment {
    /// Length of the segment in bytes.
    #[inline]
    pub fn len(&self) -> u64 {
        self.stop - self.start
    }

    /// Whether the segment is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stop == self.start
    }

    /// The segment as a byte-offset range.
    #[inline]
    pub fn range(&self) -> Range<u64> {
        self.start..self.stop
    }

    /// The segment as a `usize` range, for indexing in-memory buffers.
    #[inline]
    pub fn range_usize(&self) -> Range<usize> {
        self.start as usize..self.stop as usize
    }

    /// Seek to the segment and copy its bytes out of the stream.
    pub fn read_from<R: Read + Seek>(&self, stream: &mut R) -> Result<Vec<u8>> {
        stream.seek(SeekFrom::Start(self.start))?;
        let mut bytes = vec![0u8; self.len() as usize];
        stream.read_exact(&mut bytes)?;
        Ok(bytes)
    }
}

/// Return the byte range of the first occurrence of `tag` at or after
/// `offset`.
///
/// Unlike [`chunk_all`], a scan that exhausts the stream here is a hard
/// failure: [`Error::EndOfStream`] means no complete `tag` element exists at
/// or after `offset`.
///
/// # Example
///
/// ```
/// use std::io::Cursor;
/// use longan::chunk;
///
/// let xml = "<library><book>b1</book><book>b2</book></library>";
/// let mut stream = Cursor::new(xml.as_bytes());
///
/// let segment = chunk(&mut stream, "book", 0)?;
/// assert_eq!(&xml[segment.range_usize()], "<book>b1</book>");
/// # Ok::<(), longan::Error>(())
/// ```
pub fn chunk<R: Read + Seek>(stream: &mut R, tag: &str, offset: u64) -> Result<Segment> {
    let start = open_boundary(stream, tag, offset)?;
    let stop = close_boundary(stream, tag, start)?;
    Ok(Segment { start, stop })
}

/// Partition the whole stream into ordered, non-overlapping segments, each
/// containing at least `min_count` complete `tag` elements (except possibly
/// the last one).
///
/// The planner estimates the average element size from random samples,
/// multiplies it by `min_count` to get a jump distance, and walks the stream:
/// each segment starts at the next open boundary and stops at the first close
/// boundary past the jump. When a jump overshoots the end of the stream, a
/// dichotomic search finds the close boundary of the last complete element
/// instead, and that segment is the final one.
///
/// A document holding fewer than `min_count` elements yields exactly one
/// segment spanning all of them. A document without any `tag` element fails
/// with [`Error::TagNotFound`].
pub fn chunk_all<R: Read + Seek>(stream: &mut R, tag: &str, min_count: usize) -> Result<Vec<Segment>> {
    let jump = estimate_size(stream, tag, SIZE_PROBES)? * min_count as u64;
    let len = stream.seek(SeekFrom::End(0))?;

    let mut segments = Vec::new();
    let mut stop = 0u64;

    loop {
        // No further open tag means the previous segment was the last one.
        let start = match open_boundary(stream, tag, stop) {
            Ok(start) => start,
            Err(Error::EndOfStream) => break,
            Err(e) => return Err(e),
        };

        stop = match close_boundary(stream, tag, start + jump) {
            Ok(stop) => stop,
            // The jump overshot the last element; locate its exact close
            // boundary instead.
            Err(Error::EndOfStream) => last_close_boundary(stream, tag, start, len)?,
            Err(e) => return Err(e),
        };

        segments.push(Segment { start, stop });
    }

    Ok(segments)
}

/// Estimate the average byte span of one `tag` element from up to
/// `iterations` random samples.
///
/// The first probe always runs from position 0, which doubles as the
/// existence check: if it finds nothing, the tag is absent from the document
/// and the estimation fails with [`Error::TagNotFound`]. A later probe that
/// finds nothing merely hit an unlucky random position and is skipped. If no
/// probe ever measured a complete element, the result is
/// [`Error::EstimationFailed`] rather than a division by zero.
pub fn estimate_size<R: Read + Seek>(stream: &mut R, tag: &str, iterations: usize) -> Result<u64> {
    let len = stream.seek(SeekFrom::End(0))?;

    let mut rng = rand::rng();
    let mut spans: Vec<u64> = Vec::with_capacity(iterations);
    let mut pos = 0u64;

    for _ in 0..iterations {
        let start = match open_boundary(stream, tag, pos) {
            Ok(start) => start,
            Err(Error::EndOfStream) => {
                if pos == 0 {
                    return Err(Error::TagNotFound(tag.to_string()));
                }
                pos = rng.random_range(0..len);
                continue;
            },
            Err(e) => return Err(e),
        };

        match close_boundary(stream, tag, start) {
            Ok(stop) => spans.push(stop - start),
            // The element opened but never closed before the end of the
            // stream; nothing to record for this probe.
            Err(Error::EndOfStream) => {},
            Err(e) => return Err(e),
        }

        pos = rng.random_range(0..len);
    }

    if spans.is_empty() {
        return Err(Error::EstimationFailed(tag.to_string()));
    }

    Ok(spans.iter().sum::<u64>() / spans.len() as u64)
}

/// Return the absolute offset of the byte immediately preceding the next
/// open tag whose local name equals `tag`, scanning forward from `from`.
///
/// The boundary is placed right after the token preceding the match, so the
/// running decoder offset is sampled before advancing into the matching
/// token. Self-closing elements count as open tags.
pub fn open_boundary<R: Read + Seek>(stream: &mut R, tag: &str, from: u64) -> Result<u64> {
    stream.seek(SeekFrom::Start(from))?;
    let mut reader = scan_reader(stream);

    let mut buf = Vec::with_capacity(1024);
    let mut last = 0u64;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                if e.local_name().as_ref() == tag.as_bytes() =>
            {
                return Ok(from + last);
            },
            Ok(Event::Eof) => return Err(Error::EndOfStream),
            Err(e) => return Err(e.into()),
            _ => {},
        }
        last = reader.buffer_position();
        buf.clear();
    }
}

/// Return the absolute offset of the byte immediately after the next close
/// tag whose local name equals `tag`, scanning forward from `from`.
///
/// Self-closing elements count as close tags.
pub fn close_boundary<R: Read + Seek>(stream: &mut R, tag: &str, from: u64) -> Result<u64> {
    stream.seek(SeekFrom::Start(from))?;
    let mut reader = scan_reader(stream);

    let mut buf = Vec::with_capacity(1024);

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::End(ref e)) if e.local_name().as_ref() == tag.as_bytes() => {
                return Ok(from + reader.buffer_position());
            },
            Ok(Event::Empty(ref e)) if e.local_name().as_ref() == tag.as_bytes() => {
                return Ok(from + reader.buffer_position());
            },
            Ok(Event::Eof) => return Err(Error::EndOfStream),
            Err(e) => return Err(e.into()),
            _ => {},
        }
        buf.clear();
    }
}

/// Find the close boundary of the last complete `tag` element within
/// `(lower, upper]` by dichotomic search.
///
/// Invariant on entry: such a boundary exists strictly after `lower`. Each
/// recursive call halves the interval containing the unknown boundary, so
/// the depth is bounded by `log2(upper - lower)`.
fn last_close_boundary<R: Read + Seek>(
    stream: &mut R,
    tag: &str,
    lower: u64,
    upper: u64,
) -> Result<u64> {
    let mid = lower + (upper - lower) / 2;

    let pos = match close_boundary(stream, tag, mid) {
        Ok(pos) => pos,
        // The midpoint overshot past the last element.
        Err(Error::EndOfStream) => return last_close_boundary(stream, tag, lower, mid),
        Err(e) => return Err(e),
    };

    match close_boundary(stream, tag, pos) {
        // Another close boundary follows, so the midpoint fell short.
        Ok(_) => last_close_boundary(stream, tag, mid, upper),
        Err(Error::EndOfStream) => Ok(pos),
        Err(e) => Err(e),
    }
}

/// Build a tokenizer suitable for scanning from an arbitrary mid-document
/// offset. A scan routinely starts inside an element and meets close tags
/// whose open tags were never seen, so both the name comparison of matched
/// pairs and the unmatched-end check must be off.
fn scan_reader<R: Read>(stream: R) -> Reader<BufReader<R>> {
    let mut reader = Reader::from_reader(BufReader::new(stream));
    let config = reader.config_mut();
    config.check_end_names = false;
    config.allow_unmatched_ends = true;
    reader
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// A document whose `<song>` elements all have the same byte length, so
    /// that the randomized size estimate is constant and the resulting
    /// segment layout deterministic.
    fn music_fixture(songs: usize) -> String {
        let mut doc = String::from(
            "<music>\n  <album name=\"Black Album\">\n    <meta>\n      <band>Metallica</band>\n      <year>1991</year>\n    </meta>\n  </album>\n  <songs>\n",
        );
        for i in 1..=songs {
            doc.push_str(&format!(
                "    <song>\n      <name>track {i:03}</name>\n      <number>{i:03}</number>\n    </song>\n"
            ));
        }
        doc.push_str("  </songs>\n</music>\n");
        doc
    }

    fn song_count(slice: &str) -> usize {
        slice.matches("<song>").count()
    }

    #[test]
    fn test_open_boundary() {
        let xml = "<a><b>hi</b></a>";
        let mut stream = Cursor::new(xml.as_bytes());

        let offset = open_boundary(&mut stream, "b", 0).unwrap();
        assert_eq!(offset, 3);
        assert!(xml[offset as usize..].starts_with("<b>"));

        // Scanning past the only occurrence exhausts the stream.
        let err = open_boundary(&mut stream, "b", offset + 1).unwrap_err();
        assert!(err.is_end_of_stream());
    }

    #[test]
    fn test_close_boundary() {
        let xml = "<a><b>hi</b></a>";
        let mut stream = Cursor::new(xml.as_bytes());

        let offset = close_boundary(&mut stream, "b", 0).unwrap();
        assert_eq!(offset, 12);
        assert!(xml[..offset as usize].ends_with("</b>"));
    }

    #[test]
    fn test_boundaries_from_mid_document_offset() {
        let doc = music_fixture(3);
        let mut stream = Cursor::new(doc.as_bytes());

        // Start the scan inside the first song; the boundaries found must
        // belong to the second one.
        let first = chunk(&mut stream, "song", 0).unwrap();
        let start = open_boundary(&mut stream, "song", first.start + 1).unwrap();
        let stop = close_boundary(&mut stream, "song", start).unwrap();

        let slice = &doc[start as usize..stop as usize];
        assert!(slice.starts_with("<song>"));
        assert!(slice.ends_with("</song>"));
        assert!(slice.contains("track 002"));
    }

    #[test]
    fn test_chunk_first_occurrence() {
        let doc = music_fixture(7);
        let mut stream = Cursor::new(doc.as_bytes());

        let segment = chunk(&mut stream, "song", 0).unwrap();
        let slice = &doc[segment.range_usize()];
        assert!(slice.starts_with("<song>"));
        assert!(slice.ends_with("</song>"));
        assert_eq!(song_count(slice), 1);
        assert!(slice.contains("track 001"));
    }

    #[test]
    fn test_chunk_missing_tag() {
        let doc = music_fixture(2);
        let mut stream = Cursor::new(doc.as_bytes());

        let err = chunk(&mut stream, "movie", 0).unwrap_err();
        assert!(err.is_end_of_stream());
    }

    #[test]
    fn test_chunk_all_three_segments() {
        let doc = music_fixture(7);
        let mut stream = Cursor::new(doc.as_bytes());

        let segments = chunk_all(&mut stream, "song", 3).unwrap();
        assert_eq!(segments.len(), 3);

        let counts: Vec<usize> = segments
            .iter()
            .map(|s| song_count(&doc[s.range_usize()]))
            .collect();
        assert_eq!(counts, vec![3, 3, 1]);

        for segment in &segments {
            let slice = &doc[segment.range_usize()];
            assert!(slice.starts_with("<song>"));
            assert!(slice.ends_with("</song>"));
        }
    }

    #[test]
    fn test_chunk_all_two_segments() {
        let doc = music_fixture(7);
        let mut stream = Cursor::new(doc.as_bytes());

        let segments = chunk_all(&mut stream, "song", 5).unwrap();
        assert_eq!(segments.len(), 2);

        let counts: Vec<usize> = segments
            .iter()
            .map(|s| song_count(&doc[s.range_usize()]))
            .collect();
        assert_eq!(counts, vec![5, 2]);
    }

    #[test]
    fn test_chunk_all_fewer_elements_than_requested() {
        // Far fewer songs than the requested minimum: a single segment
        // spanning all of them, closed by the dichotomic search.
        let doc = music_fixture(4);
        let mut stream = Cursor::new(doc.as_bytes());

        let segments = chunk_all(&mut stream, "song", 10).unwrap();
        assert_eq!(segments.len(), 1);

        let slice = &doc[segments[0].range_usize()];
        assert_eq!(song_count(slice), 4);
        assert!(slice.starts_with("<song>"));
        assert!(slice.ends_with("</song>"));
    }

    #[test]
    fn test_chunk_all_missing_tag() {
        let doc = music_fixture(3);
        let mut stream = Cursor::new(doc.as_bytes());

        match chunk_all(&mut stream, "movie", 2) {
            Err(Error::TagNotFound(tag)) => assert_eq!(tag, "movie"),
            other => panic!("expected TagNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_chunk_all_self_closing_elements() {
        let xml = r#"<r><p/><p/><p a="1"/></r>"#;
        let mut stream = Cursor::new(xml.as_bytes());

        let segments = chunk_all(&mut stream, "p", 1).unwrap();
        let total: usize = segments
            .iter()
            .map(|s| xml[s.range_usize()].matches("<p").count())
            .sum();
        assert_eq!(total, 3);

        for pair in segments.windows(2) {
            assert!(pair[0].stop <= pair[1].start);
        }
    }

    #[test]
    fn test_estimate_size() {
        let xml = "<r><item>aaaa</item><item>bbbb</item><item>cccc</item></r>";
        let mut stream = Cursor::new(xml.as_bytes());

        // Every item spans exactly the same number of bytes, so the average
        // is exact no matter which positions get sampled.
        let size = estimate_size(&mut stream, "item", 10).unwrap();
        assert_eq!(size, "<item>aaaa</item>".len() as u64);
    }

    #[test]
    fn test_estimate_size_missing_tag() {
        let xml = "<r><item>aaaa</item></r>";
        let mut stream = Cursor::new(xml.as_bytes());

        match estimate_size(&mut stream, "unknown", 10) {
            Err(Error::TagNotFound(tag)) => assert_eq!(tag, "unknown"),
            other => panic!("expected TagNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_estimate_size_never_closed() {
        // The open tag exists but its close tag never arrives, so no span
        // can ever be recorded.
        let xml = "<item>aaaa";
        let mut stream = Cursor::new(xml.as_bytes());

        match estimate_size(&mut stream, "item", 10) {
            Err(Error::EstimationFailed(tag)) => assert_eq!(tag, "item"),
            other => panic!("expected EstimationFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_segment_read_from() {
        let doc = music_fixture(5);
        let mut stream = Cursor::new(doc.as_bytes());

        let segments = chunk_all(&mut stream, "song", 2).unwrap();
        for segment in &segments {
            let bytes = segment.read_from(&mut stream).unwrap();
            assert_eq!(bytes, doc[segment.range_usize()].as_bytes());
        }
    }

    #[test]
    fn test_chunk_all_on_file() {
        use std::io::Write;

        let doc = music_fixture(7);
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(doc.as_bytes()).unwrap();

        let segments = chunk_all(&mut file, "song", 3).unwrap();
        assert_eq!(segments.len(), 3);

        let total: usize = segments
            .iter()
            .map(|s| {
                let bytes = s.read_from(&mut file).unwrap();
                String::from_utf8(bytes).unwrap().matches("<song>").count()
            })
            .sum();
        assert_eq!(total, 7);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn prop_segments_cover_every_element(songs in 1usize..40, min_count in 1usize..10) {
                let doc = music_fixture(songs);
                let mut stream = Cursor::new(doc.as_bytes());

                let segments = chunk_all(&mut stream, "song", min_count).unwrap();
                prop_assert!(!segments.is_empty());

                // Ordered, non-overlapping, no partial element at either edge.
                let mut previous_stop = 0u64;
                for segment in &segments {
                    prop_assert!(segment.start >= previous_stop);
                    prop_assert!(segment.start <= segment.stop);
                    previous_stop = segment.stop;

                    let slice = &doc[segment.range_usize()];
                    prop_assert!(slice.starts_with("<song>"));
                    prop_assert!(slice.ends_with("</song>"));
                }

                // Every non-final segment holds at least the requested count,
                // and the counts sum to the total number of elements.
                let counts: Vec<usize> = segments
                    .iter()
                    .map(|s| song_count(&doc[s.range_usize()]))
                    .collect();
                for count in &counts[..counts.len() - 1] {
                    prop_assert!(*count >= min_count);
                }
                prop_assert_eq!(counts.iter().sum::<usize>(), songs);
            }
        }
    }
}

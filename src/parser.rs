use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Seek, SeekFrom};
use std::ops::ControlFlow;
use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};

use crate::{
    encoding::{EncodingResolver, ResolvedEncoding},
    error::{Diagnostics, GeoanchorError, Warning},
    model::{Model, ModelBuilder},
    offset::{CoordinateOffset, OffsetScanner},
    record::{parse_line, Line, PendingList, Record, Section},
};

pub const DEFAULT_PROGRESS_INTERVAL: usize = 20_000;

#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Lines between observer callbacks
    pub progress_interval: usize,
    /// Subtract the per-axis minimum node coordinate from every node
    pub normalize_coordinates: bool,
    pub encodings: EncodingResolver,
}

impl Default for ParseOptions {
    fn default() -> Self {
        ParseOptions {
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            normalize_coordinates: true,
            encodings: EncodingResolver::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseProgress {
    pub processed_lines: usize,
    pub total_lines: usize,
    pub current_section: Section,
    pub nodes_so_far: usize,
    pub elements_so_far: usize,
}

/// Receives periodic progress during the main pass.
///
/// Returning `ControlFlow::Break` stops the parse with
/// [`GeoanchorError::Cancelled`].
pub trait ParseObserver {
    fn on_progress(&mut self, progress: &ParseProgress) -> ControlFlow<()>;
}

impl<F> ParseObserver for F
where
    F: FnMut(&ParseProgress) -> ControlFlow<()>,
{
    fn on_progress(&mut self, progress: &ParseProgress) -> ControlFlow<()> {
        self(progress)
    }
}

/// Observer that ignores progress
pub struct Silent;

impl ParseObserver for Silent {
    fn on_progress(&mut self, _progress: &ParseProgress) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }
}

/// Terminal progress bar for the streaming parse
pub struct ProgressBarObserver {
    bar: ProgressBar,
}

impl ProgressBarObserver {
    pub fn new() -> ProgressBarObserver {
        let bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} lines {msg}",
        ) {
            bar.set_style(style);
        }
        ProgressBarObserver { bar }
    }

    pub fn hidden() -> ProgressBarObserver {
        ProgressBarObserver {
            bar: ProgressBar::hidden(),
        }
    }
}

impl Default for ProgressBarObserver {
    fn default() -> Self {
        ProgressBarObserver::new()
    }
}

impl ParseObserver for ProgressBarObserver {
    fn on_progress(&mut self, progress: &ParseProgress) -> ControlFlow<()> {
        self.bar.set_length(progress.total_lines as u64);
        self.bar.set_position(progress.processed_lines as u64);
        self.bar.set_message(format!(
            "{} | {} nodes, {} elements",
            progress.current_section.label(),
            progress.nodes_so_far,
            progress.elements_so_far
        ));

        if progress.processed_lines >= progress.total_lines {
            self.bar.finish();
        }
        ControlFlow::Continue(())
    }
}

/// Cross-line state of the main pass
struct StreamState {
    section: Section,
    pending: Option<(usize, PendingList)>,
    unknown_tokens: BTreeMap<String, usize>,
    replaced_lines: usize,
}

impl StreamState {
    fn new() -> StreamState {
        StreamState {
            section: Section::default(),
            pending: None,
            unknown_tokens: BTreeMap::new(),
            replaced_lines: 0,
        }
    }

    /// Delivers the open list, even if it closes short of its count
    fn close_pending(&mut self, builder: &mut ModelBuilder, diagnostics: &mut Diagnostics) {
        if let Some((line, list)) = self.pending.take() {
            if !list.is_complete() {
                diagnostics.push(Warning::MalformedRecord {
                    line,
                    reason: format!(
                        "list closed with {} of {} declared id(s)",
                        list.ids.len(),
                        list.expected
                    ),
                });
            }
            builder.insert(list.into_record(), line, diagnostics);
        }
    }

    fn handle(
        &mut self,
        parsed: Result<Line, String>,
        line_number: usize,
        offset: &CoordinateOffset,
        builder: &mut ModelBuilder,
        diagnostics: &mut Diagnostics,
    ) {
        let line = match parsed {
            Ok(line) => line,
            Err(reason) => {
                diagnostics.push(Warning::MalformedRecord {
                    line: line_number,
                    reason,
                });
                return;
            }
        };

        match line {
            Line::Blank | Line::Comment(None) => {}
            Line::Comment(Some(section)) => {
                self.close_pending(builder, diagnostics);
                self.section = section;
            }
            Line::Record(record) => {
                self.close_pending(builder, diagnostics);
                let record = match record {
                    Record::Node { id, position } => Record::Node {
                        id,
                        position: offset.normalize(&position),
                    },
                    other => other,
                };
                builder.insert(record, line_number, diagnostics);
            }
            Line::List(list) => {
                self.close_pending(builder, diagnostics);
                if list.is_complete() {
                    builder.insert(list.into_record(), line_number, diagnostics);
                } else {
                    self.pending = Some((line_number, list));
                }
            }
            Line::Continuation(ids) => {
                let Some((_, list)) = self.pending.as_mut() else {
                    diagnostics.push(Warning::MalformedRecord {
                        line: line_number,
                        reason: "continuation line without an open id list".to_owned(),
                    });
                    return;
                };

                if let Err(reason) = list.extend(&ids) {
                    diagnostics.push(Warning::MalformedRecord {
                        line: line_number,
                        reason,
                    });
                    return;
                }
                if list.is_complete() {
                    self.close_pending(builder, diagnostics);
                }
            }
            Line::Unknown(token) => {
                *self.unknown_tokens.entry(token).or_insert(0) += 1;
            }
        }
    }
}

/// Reads one raw line into `buffer`, without its terminator.
///
/// # Returns
/// `false` at end of input
fn read_raw_line<R: BufRead>(reader: &mut R, buffer: &mut Vec<u8>) -> Result<bool, GeoanchorError> {
    buffer.clear();
    if reader.read_until(b'\n', buffer)? == 0 {
        return Ok(false);
    }
    while matches!(buffer.last(), Some(b'\n') | Some(b'\r')) {
        buffer.pop();
    }
    Ok(true)
}

fn starts_with_token(line: &[u8], token: &[u8]) -> bool {
    match line.iter().position(|b| !b.is_ascii_whitespace()) {
        Some(start) => line[start..].starts_with(token),
        None => false,
    }
}

/// First pass: counts lines and finds the coordinate offset
fn pre_scan<R: BufRead>(
    reader: &mut R,
    encoding: &ResolvedEncoding,
    normalize: bool,
) -> Result<(usize, CoordinateOffset), GeoanchorError> {
    let mut buffer = Vec::new();
    let mut total_lines = 0;
    let mut scanner = OffsetScanner::new();

    while read_raw_line(reader, &mut buffer)? {
        total_lines += 1;
        if !normalize || !starts_with_token(&buffer, b"NODE") {
            continue;
        }

        let (text, _) = encoding.decode_line(&buffer);
        if let Ok(Line::Record(Record::Node { position, .. })) = parse_line(&text) {
            scanner.observe(&position);
        }
    }

    Ok((total_lines, scanner.finish()))
}

/// Parses a model from a seekable byte source.
///
/// The source is read three times: a bounded prefix for encoding
/// detection, a pre-scan for the line count and coordinate offset, and the
/// main pass that assembles the model. Only one line is held at a time.
///
/// # Arguments
/// * `reader` - The raw model source
/// * `options` - Parse options
/// * `observer` - Receives progress every `options.progress_interval` lines
///
/// # Returns
/// The assembled model and every warning raised while parsing and assembling
pub fn parse<R, O>(
    mut reader: R,
    options: &ParseOptions,
    observer: &mut O,
) -> Result<(Model, Diagnostics), GeoanchorError>
where
    R: BufRead + Seek,
    O: ParseObserver + ?Sized,
{
    let encoding = options.encodings.resolve_reader(&mut reader)?;
    log::info!("decoding model source as {}", encoding.name());

    reader.seek(SeekFrom::Start(encoding.bom_length as u64))?;
    let (total_lines, offset) = pre_scan(&mut reader, &encoding, options.normalize_coordinates)?;
    log::info!(
        "pre-scan: {total_lines} lines, coordinate offset ({:.3}, {:.3}, {:.3})",
        offset.origin().x,
        offset.origin().y,
        offset.origin().z
    );

    reader.seek(SeekFrom::Start(encoding.bom_length as u64))?;

    let interval = options.progress_interval.max(1);
    let mut builder = ModelBuilder::new(offset);
    let mut diagnostics = Diagnostics::new();
    let mut state = StreamState::new();
    let mut buffer = Vec::new();
    let mut processed_lines = 0;

    while read_raw_line(&mut reader, &mut buffer)? {
        processed_lines += 1;

        let (text, replaced) = encoding.decode_line(&buffer);
        if replaced {
            state.replaced_lines += 1;
        }
        state.handle(
            parse_line(&text),
            processed_lines,
            &offset,
            &mut builder,
            &mut diagnostics,
        );

        if processed_lines % interval == 0 {
            let progress = ParseProgress {
                processed_lines,
                total_lines,
                current_section: state.section,
                nodes_so_far: builder.node_count(),
                elements_so_far: builder.element_count(),
            };
            if observer.on_progress(&progress).is_break() {
                log::info!("parse cancelled after {processed_lines} lines");
                return Err(GeoanchorError::Cancelled { processed_lines });
            }
        }
    }
    state.close_pending(&mut builder, &mut diagnostics);

    // final callback so observers can reach 100%, unless the loop already sent it
    if processed_lines == 0 || processed_lines % interval != 0 {
        let _ = observer.on_progress(&ParseProgress {
            processed_lines,
            total_lines,
            current_section: state.section,
            nodes_so_far: builder.node_count(),
            elements_so_far: builder.element_count(),
        });
    }

    if encoding.fallback || state.replaced_lines > 0 {
        diagnostics.push(Warning::DecodeFallback {
            encoding: encoding.name(),
            replaced_lines: state.replaced_lines,
        });
    }
    for (token, count) in &state.unknown_tokens {
        log::debug!("ignored {count} line(s) with unrecognised token {token}");
    }

    builder.set_source(encoding.name(), encoding.fallback, processed_lines);
    let model = builder.finish(&mut diagnostics);
    log::info!(
        "parsed {} nodes, {} elements, {} stages from {processed_lines} lines",
        model.nodes().len(),
        model.elements().len(),
        model.stages().len()
    );

    Ok((model, diagnostics))
}

/// Opens `path` and parses it with [`parse`]
pub fn parse_file<O>(
    path: &Path,
    options: &ParseOptions,
    observer: &mut O,
) -> Result<(Model, Diagnostics), GeoanchorError>
where
    O: ParseObserver + ?Sized,
{
    let file = match File::open(path) {
        Ok(f) => f,
        Err(err) => {
            return Err(GeoanchorError::Input(format!(
                "Unable to open model file {}: {err}",
                path.display()
            )))
        }
    };

    parse(BufReader::new(file), options, observer)
}

/// Parses an in-memory source
pub fn parse_bytes(
    source: &[u8],
    options: &ParseOptions,
) -> Result<(Model, Diagnostics), GeoanchorError> {
    parse(Cursor::new(source), options, &mut Silent)
}

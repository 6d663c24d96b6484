//! Pull-based reader for the batch wire format.

use crate::fields::{split_record, SplitOutcome};
use crate::{tokens, ProtocolError, Result};
use std::collections::HashMap;
use std::io::BufRead;
use sync_model::event::Cell;
use sync_model::{Batch, BatchStats, BinaryEncoding, EventType, RowEvent, Table};
use tracing::{debug, warn};

/// One tokenized wire record plus its raw length for byte accounting.
struct Record {
    directive: String,
    cells: Vec<Cell>,
    raw_len: u64,
    line: u64,
}

/// Streaming reader producing `Batch` / `Table` / `RowEvent` units.
///
/// The consumer drives it in the batch/table/row nesting of the wire
/// format:
///
/// ```ignore
/// while let Some(batch) = reader.next_batch()? {
///     while let Some(table) = reader.next_table()? {
///         while let Some(event) = reader.next_event()? {
///             load(&batch, &table, event)?;
///         }
///     }
///     let stats = reader.take_batch_stats();
/// }
/// ```
///
/// At most one record of look-ahead is buffered; nothing beyond the
/// unit being returned is materialized.
pub struct ProtocolReader<R: BufRead> {
    input: R,
    lookahead: Option<Record>,
    line: u64,

    // stream-session context
    node_id: Option<String>,
    channel_id: String,
    binary_encoding: BinaryEncoding,
    catalog: Option<String>,
    schema: Option<String>,
    table_cache: HashMap<String, Table>,

    // per-batch context
    in_batch: bool,
    current_table: Option<Table>,
    pending_table: Option<(Option<String>, Option<String>, String)>,
    pending_keys: Vec<String>,
    pending_old: Option<Vec<Cell>>,
    stats: BatchStats,
}

impl<R: BufRead> ProtocolReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            lookahead: None,
            line: 0,
            node_id: None,
            channel_id: "default".to_string(),
            binary_encoding: BinaryEncoding::default(),
            catalog: None,
            schema: None,
            table_cache: HashMap::new(),
            in_batch: false,
            current_table: None,
            pending_table: None,
            pending_keys: Vec::new(),
            pending_old: None,
            stats: BatchStats::default(),
        }
    }

    /// The source node declared by the stream, if any has been read yet.
    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }

    /// Statistics accumulated for the batch in progress.
    pub fn batch_stats(&self) -> &BatchStats {
        &self.stats
    }

    /// Hand the per-batch statistics to the caller, resetting them.
    pub fn take_batch_stats(&mut self) -> BatchStats {
        std::mem::take(&mut self.stats)
    }

    /// Advance to the next `batch` directive, applying any session
    /// context records (`nodeid`, `binary`, `channel`) seen on the way.
    /// Records belonging to an abandoned batch are skipped, which is
    /// what allows stream-level continuation after a failed batch.
    pub fn next_batch(&mut self) -> Result<Option<Batch>> {
        self.in_batch = false;
        loop {
            let record = match self.take_record()? {
                Some(record) => record,
                None => return Ok(None),
            };
            match record.directive.as_str() {
                tokens::NODEID => self.node_id = first_cell(&record),
                tokens::BINARY => {
                    if let Some(token) = first_cell(&record) {
                        self.binary_encoding = BinaryEncoding::from_token(&token)
                            .map_err(|e| malformed(&record, e.to_string()))?;
                    }
                }
                tokens::CHANNEL => {
                    if let Some(channel) = first_cell(&record) {
                        self.channel_id = channel;
                    }
                }
                tokens::BATCH => {
                    let batch_id = required_i64(&record)?;
                    self.in_batch = true;
                    self.current_table = None;
                    self.pending_table = None;
                    self.pending_keys.clear();
                    self.pending_old = None;
                    self.stats = BatchStats {
                        byte_count: record.raw_len,
                        ..Default::default()
                    };
                    let batch = Batch::new(
                        batch_id,
                        self.channel_id.clone(),
                        self.node_id.clone().unwrap_or_default(),
                    )
                    .with_encoding(self.binary_encoding);
                    return Ok(Some(batch));
                }
                other => {
                    debug!(directive = other, "skipping record outside batch");
                }
            }
        }
    }

    /// Advance to the next table definition within the current batch.
    ///
    /// Returns `None` once the batch's `commit` record is consumed (or a
    /// new `batch` record is seen, which is left buffered). A `table`
    /// record naming an already-seen qualified name returns the cached
    /// definition immediately without waiting for `keys`/`columns`.
    pub fn next_table(&mut self) -> Result<Option<Table>> {
        loop {
            let record = match self.take_record()? {
                Some(record) => record,
                None => return Ok(None),
            };
            match record.directive.as_str() {
                tokens::NODEID => self.node_id = first_cell(&record),
                tokens::BINARY => {
                    if let Some(token) = first_cell(&record) {
                        self.binary_encoding = BinaryEncoding::from_token(&token)
                            .map_err(|e| malformed(&record, e.to_string()))?;
                    }
                }
                tokens::CHANNEL => {
                    if let Some(channel) = first_cell(&record) {
                        self.channel_id = channel;
                    }
                }
                tokens::CATALOG => self.catalog = first_cell(&record),
                tokens::SCHEMA => self.schema = first_cell(&record),
                tokens::TABLE => {
                    let name = first_cell(&record)
                        .ok_or_else(|| malformed(&record, "missing table name".to_string()))?;
                    let qualified =
                        qualified_name(self.catalog.as_deref(), self.schema.as_deref(), &name);
                    self.pending_table =
                        Some((self.catalog.clone(), self.schema.clone(), name.clone()));
                    if let Some(cached) = self.table_cache.get(&qualified) {
                        self.current_table = Some(cached.clone());
                        return Ok(Some(cached.clone()));
                    }
                }
                tokens::KEYS => {
                    self.pending_keys = record
                        .cells
                        .iter()
                        .skip(1)
                        .filter_map(|c| c.clone())
                        .collect();
                }
                tokens::COLUMNS => {
                    let (catalog, schema, name) = self
                        .pending_table
                        .clone()
                        .ok_or_else(|| malformed(&record, "columns without table".to_string()))?;
                    let column_names: Vec<String> = record
                        .cells
                        .iter()
                        .skip(1)
                        .map(|c| c.clone().unwrap_or_default())
                        .collect();
                    let columns = column_names
                        .into_iter()
                        .map(|n| {
                            sync_model::Column::new(n, sync_model::ColumnTypeCode::Other)
                        })
                        .collect();
                    let mut table = Table::qualified(catalog, schema, name, columns);
                    table.set_primary_keys(&std::mem::take(&mut self.pending_keys));
                    self.table_cache.insert(table.qualified_name(), table.clone());
                    self.current_table = Some(table.clone());
                    return Ok(Some(table));
                }
                tokens::COMMIT => {
                    self.in_batch = false;
                    return Ok(None);
                }
                tokens::BATCH => {
                    // a new batch without a commit for the previous one;
                    // hand control back to next_batch
                    self.push_back(record);
                    self.in_batch = false;
                    return Ok(None);
                }
                tokens::INSERT
                | tokens::UPDATE
                | tokens::DELETE
                | tokens::OLD
                | tokens::SQL
                | tokens::BSH
                | tokens::CREATE => {
                    // rows still pending for the table already in
                    // context; hand that table back and let next_event
                    // consume them
                    match self.current_table.clone() {
                        Some(table) => {
                            self.push_back(record);
                            return Ok(Some(table));
                        }
                        None => {
                            return Err(ProtocolError::MissingTableContext { line: record.line })
                        }
                    }
                }
                other => {
                    // not reachable through take_record, which filters
                    // unknown directives, but keep the arm total
                    debug!(directive = other, "ignoring record while seeking table");
                }
            }
        }
    }

    /// Advance to the next row event for the current table.
    ///
    /// Returns `None` when the next record is a table definition, a
    /// commit, or a new batch; those records stay buffered for
    /// [`Self::next_table`] / [`Self::next_batch`].
    pub fn next_event(&mut self) -> Result<Option<RowEvent>> {
        loop {
            let record = match self.take_record()? {
                Some(record) => record,
                None => return Ok(None),
            };
            match record.directive.as_str() {
                tokens::OLD => {
                    let table = self.require_table(&record)?;
                    let expected = table.column_count();
                    let cells = row_cells(&record, expected)?;
                    self.pending_old = Some(cells);
                }
                tokens::INSERT => {
                    let table = self.require_table(&record)?;
                    let expected = table.column_count();
                    let cells = row_cells(&record, expected)?;
                    self.pending_old = None;
                    return Ok(Some(RowEvent::insert(cells)));
                }
                tokens::UPDATE => {
                    let table = self.require_table(&record)?;
                    let column_count = table.column_count();
                    let pk_count = table.primary_key_columns().len();
                    let mut cells = row_cells(&record, column_count + pk_count)?;
                    let pk_cells: Vec<Cell> = cells.split_off(column_count);
                    let mut event = if pk_count > 0 {
                        RowEvent::update(cells, pk_cells)
                    } else {
                        // keyless table: the whole row locates itself
                        RowEvent {
                            event_type: EventType::Update,
                            row_data: Some(cells),
                            old_data: None,
                            pk_data: None,
                        }
                    };
                    if let Some(old) = self.pending_old.take() {
                        event = event.with_old_data(old);
                    }
                    return Ok(Some(event));
                }
                tokens::DELETE => {
                    let table = self.require_table(&record)?;
                    let pk_count = table.primary_key_columns().len();
                    let expected = if pk_count > 0 {
                        pk_count
                    } else {
                        table.column_count()
                    };
                    let cells = row_cells(&record, expected)?;
                    let mut event = RowEvent::delete(cells);
                    if let Some(old) = self.pending_old.take() {
                        event = event.with_old_data(old);
                    }
                    return Ok(Some(event));
                }
                tokens::SQL | tokens::BSH | tokens::CREATE => {
                    let payload = payload_cell(&record)?;
                    self.pending_old = None;
                    let event = match record.directive.as_str() {
                        tokens::SQL => RowEvent::sql(payload),
                        tokens::BSH => RowEvent::script(payload),
                        _ => RowEvent::create(payload),
                    };
                    return Ok(Some(event));
                }
                tokens::TABLE | tokens::CATALOG | tokens::SCHEMA | tokens::KEYS
                | tokens::COLUMNS | tokens::COMMIT | tokens::BATCH => {
                    self.push_back(record);
                    return Ok(None);
                }
                tokens::NODEID => self.node_id = first_cell(&record),
                tokens::BINARY => {
                    if let Some(token) = first_cell(&record) {
                        self.binary_encoding = BinaryEncoding::from_token(&token)
                            .map_err(|e| malformed(&record, e.to_string()))?;
                    }
                }
                tokens::CHANNEL => {
                    if let Some(channel) = first_cell(&record) {
                        self.channel_id = channel;
                    }
                }
                other => {
                    debug!(directive = other, "ignoring record while reading rows");
                }
            }
        }
    }

    fn require_table(&self, record: &Record) -> Result<&Table> {
        self.current_table
            .as_ref()
            .ok_or(ProtocolError::MissingTableContext { line: record.line })
    }

    fn push_back(&mut self, record: Record) {
        debug_assert!(self.lookahead.is_none());
        // the byte count was already charged when the record was taken;
        // back it out so a re-take does not double count
        if self.in_batch {
            self.stats.byte_count = self.stats.byte_count.saturating_sub(record.raw_len);
        }
        self.lookahead = Some(record);
    }

    /// Read the next record, skipping blank lines and unrecognized
    /// directives (logged and ignored, the forward-compatibility
    /// tolerance of the wire format).
    fn take_record(&mut self) -> Result<Option<Record>> {
        if let Some(record) = self.lookahead.take() {
            if self.in_batch {
                self.stats.byte_count += record.raw_len;
            }
            return Ok(Some(record));
        }
        loop {
            let start_line = self.line + 1;
            let mut raw = String::new();
            let mut read = self.input.read_line(&mut raw)?;
            if read == 0 {
                return Ok(None);
            }
            self.line += 1;
            let mut raw_len = read as u64;
            trim_newline(&mut raw);
            // a quoted field may span physical lines; keep appending
            // until the quote closes
            let cells = loop {
                match split_record(&raw) {
                    SplitOutcome::Complete(cells) => break cells,
                    SplitOutcome::NeedMore => {
                        raw.push('\n');
                        let mut next = String::new();
                        read = self.input.read_line(&mut next)?;
                        if read == 0 {
                            return Err(ProtocolError::UnterminatedQuote { line: start_line });
                        }
                        self.line += 1;
                        raw_len += read as u64;
                        trim_newline(&mut next);
                        raw.push_str(&next);
                    }
                }
            };
            let directive = match cells.first().and_then(|c| c.clone()) {
                Some(d) => d,
                None => continue, // blank line
            };
            if !is_known_directive(&directive) {
                warn!(token = %directive, line = start_line, "skipping unrecognized protocol directive");
                continue;
            }
            if self.in_batch {
                self.stats.byte_count += raw_len;
            }
            return Ok(Some(Record {
                directive,
                cells,
                raw_len,
                line: start_line,
            }));
        }
    }
}

fn is_known_directive(directive: &str) -> bool {
    matches!(
        directive,
        tokens::NODEID
            | tokens::BINARY
            | tokens::CHANNEL
            | tokens::BATCH
            | tokens::CATALOG
            | tokens::SCHEMA
            | tokens::TABLE
            | tokens::KEYS
            | tokens::COLUMNS
            | tokens::INSERT
            | tokens::OLD
            | tokens::UPDATE
            | tokens::DELETE
            | tokens::SQL
            | tokens::BSH
            | tokens::CREATE
            | tokens::COMMIT
    )
}

fn trim_newline(raw: &mut String) {
    if raw.ends_with('\n') {
        raw.pop();
        if raw.ends_with('\r') {
            raw.pop();
        }
    }
}

fn first_cell(record: &Record) -> Option<String> {
    record.cells.get(1).and_then(|c| c.clone())
}

fn required_i64(record: &Record) -> Result<i64> {
    let text = first_cell(record)
        .ok_or_else(|| malformed(record, "missing numeric field".to_string()))?;
    text.parse::<i64>()
        .map_err(|_| malformed(record, format!("'{text}' is not a number")))
}

fn malformed(record: &Record, reason: String) -> ProtocolError {
    ProtocolError::Malformed {
        directive: record.directive.clone(),
        line: record.line,
        reason,
    }
}

/// The positional cells of a row record, validated against the count the
/// current table definition demands.
fn row_cells(record: &Record, expected: usize) -> Result<Vec<Cell>> {
    let actual = record.cells.len() - 1;
    if actual != expected {
        return Err(ProtocolError::FieldCount {
            directive: record.directive.clone(),
            line: record.line,
            expected,
            actual,
        });
    }
    Ok(record.cells[1..].to_vec())
}

fn payload_cell(record: &Record) -> Result<String> {
    if record.cells.len() != 2 {
        return Err(ProtocolError::FieldCount {
            directive: record.directive.clone(),
            line: record.line,
            expected: 1,
            actual: record.cells.len() - 1,
        });
    }
    record.cells[1]
        .clone()
        .ok_or_else(|| malformed(record, "empty payload".to_string()))
}

fn qualified_name(catalog: Option<&str>, schema: Option<&str>, name: &str) -> String {
    match (catalog, schema) {
        (Some(c), Some(s)) => format!("{c}.{s}.{name}"),
        (Some(c), None) => format!("{c}.{name}"),
        (None, Some(s)) => format!("{s}.{name}"),
        (None, None) => name.to_string(),
    }
}

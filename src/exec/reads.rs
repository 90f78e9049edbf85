use std::collections::BTreeMap;

use crate::buffer::TmpBuffer;
use crate::foundation::core::ExecSide;
use crate::foundation::error::{TesseraError, TesseraResult};
use crate::graph::graph::OpId;

/// Read bookkeeping of one operation for one execution.
///
/// Both counters only ever grow toward their totals. The buffer is handed out exactly once, at
/// the moment both reach their totals; any access after that is an invariant error.
#[derive(Debug)]
pub struct OpReads {
    pub op: OpId,
    pub total_cpu_reads: u32,
    pub current_cpu_reads: u32,
    pub total_compute_reads: u32,
    pub current_compute_reads: u32,
    pub is_write_complete: bool,
    buffer: Option<TmpBuffer>,
    released: bool,
}

impl OpReads {
    fn new(op: OpId) -> Self {
        Self {
            op,
            total_cpu_reads: 0,
            current_cpu_reads: 0,
            total_compute_reads: 0,
            current_compute_reads: 0,
            is_write_complete: false,
            buffer: None,
            released: false,
        }
    }

    pub fn has_cpu_reads(&self) -> bool {
        self.total_cpu_reads > 0
    }

    pub fn has_compute_reads(&self) -> bool {
        self.total_compute_reads > 0
    }

    /// Reads still outstanding.
    pub fn pending(&self) -> u32 {
        (self.total_cpu_reads - self.current_cpu_reads)
            + (self.total_compute_reads - self.current_compute_reads)
    }

    pub fn is_fully_read(&self) -> bool {
        self.current_cpu_reads == self.total_cpu_reads
            && self.current_compute_reads == self.total_compute_reads
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub(crate) fn add_output_read(&mut self) {
        self.total_cpu_reads += 1;
    }

    /// Bind the written buffer and mark the write complete.
    pub(crate) fn complete_write(&mut self, buffer: Option<TmpBuffer>) -> TesseraResult<()> {
        if self.is_write_complete {
            return Err(TesseraError::invariant(format!(
                "{} written twice in one execution",
                self.op
            )));
        }
        self.buffer = buffer;
        self.is_write_complete = true;
        Ok(())
    }

    /// Record reads reported by a reader. Returns `true` once every declared read happened.
    pub fn consume(&mut self, cpu: u32, compute: u32) -> TesseraResult<bool> {
        if self.released {
            return Err(TesseraError::invariant(format!(
                "{} read after its buffer was released",
                self.op
            )));
        }
        if !self.is_write_complete {
            return Err(TesseraError::invariant(format!(
                "{} read before its write completed",
                self.op
            )));
        }
        let cpu_after = self.current_cpu_reads + cpu;
        let compute_after = self.current_compute_reads + compute;
        if cpu_after > self.total_cpu_reads || compute_after > self.total_compute_reads {
            return Err(TesseraError::invariant(format!(
                "{} over-read: cpu {cpu_after}/{}, compute {compute_after}/{}",
                self.op, self.total_cpu_reads, self.total_compute_reads
            )));
        }
        self.current_cpu_reads = cpu_after;
        self.current_compute_reads = compute_after;
        Ok(self.is_fully_read())
    }

    /// The written buffer. `None` for operations that produce no buffer.
    pub fn buffer(&self) -> TesseraResult<Option<&TmpBuffer>> {
        if self.released {
            return Err(TesseraError::invariant(format!(
                "{} accessed after release",
                self.op
            )));
        }
        if !self.is_write_complete {
            return Err(TesseraError::invariant(format!(
                "{} read before its write completed",
                self.op
            )));
        }
        Ok(self.buffer.as_ref())
    }

    pub(crate) fn buffer_mut(&mut self) -> TesseraResult<Option<&mut TmpBuffer>> {
        self.buffer()?;
        Ok(self.buffer.as_mut())
    }

    /// Hand the buffer back for recycling. Only legal once every read happened.
    pub(crate) fn release(&mut self) -> TesseraResult<Option<TmpBuffer>> {
        if self.released {
            return Err(TesseraError::invariant(format!("{} released twice", self.op)));
        }
        if !self.is_write_complete || !self.is_fully_read() {
            return Err(TesseraError::invariant(format!(
                "{} released with {} reads pending",
                self.op,
                self.pending()
            )));
        }
        self.released = true;
        Ok(self.buffer.take())
    }

    /// Take whatever buffer is held, ignoring counters. Used when an execution is abandoned.
    pub(crate) fn abandon(&mut self) -> Option<TmpBuffer> {
        self.released = true;
        self.buffer.take()
    }
}

/// Reads one reader contributes to one producer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReaderReads {
    pub producer: OpId,
    pub reader: OpId,
    pub cpu_reads: u32,
    pub compute_reads: u32,
}

/// Per-operation read counting, filled during the optimize pass.
#[derive(Debug)]
pub struct ReadsOptimizer {
    op: OpId,
    reads: Option<OpReads>,
    reader_reads: BTreeMap<OpId, ReaderReads>,
    reader_reads_peeked: bool,
}

impl ReadsOptimizer {
    pub fn new(op: OpId) -> Self {
        Self {
            op,
            reads: None,
            reader_reads: BTreeMap::new(),
            reader_reads_peeked: false,
        }
    }

    /// Create the read record if needed and count one read by `reader`, classified by the side
    /// the reader executes on.
    pub fn register_read(&mut self, reader: Option<(OpId, ExecSide)>) {
        let op = self.op;
        let reads = self.reads.get_or_insert_with(|| OpReads::new(op));
        let Some((reader, side)) = reader else {
            return;
        };
        let rr = self.reader_reads.entry(reader).or_insert(ReaderReads {
            producer: op,
            reader,
            cpu_reads: 0,
            compute_reads: 0,
        });
        match side {
            ExecSide::Host => {
                rr.cpu_reads += 1;
                reads.total_cpu_reads += 1;
            }
            ExecSide::Device => {
                rr.compute_reads += 1;
                reads.total_compute_reads += 1;
            }
        }
    }

    pub fn peep_reads(&self) -> TesseraResult<&OpReads> {
        self.reads.as_ref().ok_or_else(|| {
            TesseraError::invariant(format!("{} has no reads registered", self.op))
        })
    }

    pub fn peep_reads_mut(&mut self) -> TesseraResult<&mut OpReads> {
        let op = self.op;
        self.reads
            .as_mut()
            .ok_or_else(|| TesseraError::invariant(format!("{op} has no reads registered")))
    }

    /// The full reader table, in reader order. Callable once per execution.
    pub fn peep_all_reader_reads(&mut self) -> TesseraResult<Vec<ReaderReads>> {
        if self.reader_reads_peeked {
            return Err(TesseraError::invariant(format!(
                "reader reads of {} requested twice",
                self.op
            )));
        }
        self.reader_reads_peeked = true;
        Ok(self.reader_reads.values().copied().collect())
    }
}

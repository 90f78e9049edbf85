//! Write-once orchestration of operation buffers.
//!
//! The optimize pass resolves, for every reachable operation, where it executes and how many
//! host and device reads its output will see. The exec pass then writes each operation at most
//! once, places its buffer where its readers need it, and hands the buffer back to the recycler
//! the moment its last declared read is reported.

use std::collections::BTreeMap;
use std::sync::Arc;

use smallvec::{SmallVec, smallvec};

use crate::buffer::{HostData, HostFacet, HostMem, TmpBuffer};
use crate::device::{self, Device, KernelArg};
use crate::exec::execution::{ExecutionContext, PassMode, WriteOutcome};
use crate::exec::reads::{OpReads, ReaderReads, ReadsOptimizer};
use crate::exec::recycler::RecycleClass;
use crate::foundation::core::{ExecSide, ImageBuf};
use crate::foundation::error::{TesseraError, TesseraResult};
use crate::graph::graph::{OpId, OperationGraph};
use crate::graph::key::OperationKey;
use crate::graph::operation::{BufferType, InputPixels, InputSet, Operation};

/// Whether `op` runs on the accelerator in this execution.
pub fn runs_on_device(op: &dyn Operation, device: Option<&dyn Device>) -> bool {
    let Some(device) = device else {
        return false;
    };
    let (max_w, max_h) = device.max_image_size();
    op.prefers_accelerator()
        && device.compute_units() > 0
        && op.buffer_type() == BufferType::Temporal
        && op.kernel().is_some()
        && op.width() <= max_w
        && op.height() <= max_h
}

/// Where a buffer must live so every declared reader can be served.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Placement {
    /// Host memory only.
    Host,
    /// Device memory only.
    Device,
    /// Plain host and plain device memory; the side that did not execute is synced after.
    Both,
    /// Host write into mapped device memory, unmapped after the write.
    MappedForDevice,
    /// Device write into host-mappable memory, mapped into host space after the write.
    MappableForHost,
}

fn placement(side: ExecSide, reads: &OpReads) -> Placement {
    let cpu = reads.has_cpu_reads();
    let compute = reads.has_compute_reads();
    match (side, cpu, compute) {
        (_, true, true) => Placement::Both,
        (ExecSide::Host, false, true) => Placement::MappedForDevice,
        (ExecSide::Host, _, false) => Placement::Host,
        (ExecSide::Device, true, false) => Placement::MappableForHost,
        (ExecSide::Device, false, _) => Placement::Device,
    }
}

#[derive(Default)]
struct OpState {
    reached: bool,
    side: Option<ExecSide>,
    cache_hit: bool,
    /// Earlier cache point with the same key; its cache entry is shared instead of written.
    alias_of: Option<OpId>,
    in_progress: bool,
    optimizer: Option<ReadsOptimizer>,
    /// Producers this operation credits once its own write completes.
    credits: Vec<ReaderReads>,
}

/// Decides, per operation, whether a write happens and what memory backs it.
pub struct BufferManager {
    ops: Vec<OpState>,
    outputs: Vec<OpId>,
    optimized: bool,
}

impl BufferManager {
    pub fn new(graph: &OperationGraph) -> Self {
        Self {
            ops: graph.ids().map(|_| OpState::default()).collect(),
            outputs: Vec::new(),
            optimized: false,
        }
    }

    fn state(&self, id: OpId) -> TesseraResult<&OpState> {
        self.ops
            .get(id.idx())
            .ok_or_else(|| TesseraError::invariant(format!("{id} is not managed")))
    }

    fn state_mut(&mut self, id: OpId) -> TesseraResult<&mut OpState> {
        self.ops
            .get_mut(id.idx())
            .ok_or_else(|| TesseraError::invariant(format!("{id} is not managed")))
    }

    pub fn is_reached(&self, id: OpId) -> bool {
        self.ops.get(id.idx()).is_some_and(|s| s.reached)
    }

    pub fn side(&self, id: OpId) -> Option<ExecSide> {
        self.ops.get(id.idx()).and_then(|s| s.side)
    }

    pub fn reads(&self, id: OpId) -> TesseraResult<&OpReads> {
        self.state(id)?
            .optimizer
            .as_ref()
            .ok_or_else(|| TesseraError::invariant(format!("{id} was not reached")))?
            .peep_reads()
    }

    fn reads_mut(&mut self, id: OpId) -> TesseraResult<&mut OpReads> {
        self.state_mut(id)?
            .optimizer
            .as_mut()
            .ok_or_else(|| TesseraError::invariant(format!("{id} was not reached")))?
            .peep_reads_mut()
    }

    /// Optimize pass: reachability, execution sides and read counts for `outputs`.
    ///
    /// Cache hits, constants and self-buffered operations do not pull their inputs.
    pub fn optimize(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        graph: &OperationGraph,
        outputs: &[OpId],
    ) -> TesseraResult<()> {
        if ctx.manager.mode() != PassMode::Optimize {
            return Err(TesseraError::invariant("optimize called outside the optimize pass"));
        }
        if self.optimized {
            return Err(TesseraError::invariant("optimize pass ran twice"));
        }
        graph.validate_outputs(outputs)?;

        let mut cache_hit = vec![false; graph.len()];
        let mut alias_of: Vec<Option<OpId>> = vec![None; graph.len()];
        let mut filled_by: BTreeMap<OperationKey, OpId> = BTreeMap::new();
        for id in graph.ids() {
            let op = graph.op(id)?;
            if op.buffer_type() == BufferType::Cached {
                if !op.is_cache_point() {
                    return Err(TesseraError::invariant(format!(
                        "{id} ({}) requests a cached buffer but is not a cache point",
                        op.kind()
                    )));
                }
                let key = op.key();
                cache_hit[id.idx()] = ctx.cache.contains(&key);
                if !cache_hit[id.idx()] {
                    let first = *filled_by.entry(key).or_insert(id);
                    if first != id {
                        alias_of[id.idx()] = Some(first);
                    }
                }
            }
        }
        let reached = graph.reachable(outputs, |id| {
            let op = graph.op(id)?;
            Ok(match alias_of[id.idx()] {
                Some(first) => smallvec![first],
                None if expands(op, cache_hit[id.idx()]) => SmallVec::from_slice(op.inputs()),
                None => SmallVec::new(),
            })
        })?;
        let order = graph.topological_order(&reached)?;

        let device = ctx.device.as_deref();
        for &id in &order {
            let op = graph.op(id)?;
            let side = if runs_on_device(op, device) {
                ExecSide::Device
            } else {
                ExecSide::Host
            };
            let st = &mut self.ops[id.idx()];
            st.reached = true;
            st.side = Some(side);
            st.cache_hit = cache_hit[id.idx()];
            st.alias_of = alias_of[id.idx()];
            let mut optimizer = ReadsOptimizer::new(id);
            optimizer.register_read(None);
            st.optimizer = Some(optimizer);
        }

        for &reader in &order {
            let st = &self.ops[reader.idx()];
            let op = graph.op(reader)?;
            let producers: SmallVec<[OpId; 4]> = match st.alias_of {
                Some(first) => smallvec![first],
                None if expands(op, st.cache_hit) => SmallVec::from_slice(op.inputs()),
                None => continue,
            };
            let side = st.side.unwrap_or(ExecSide::Host);
            for &input in &producers {
                let producer = self.ops[input.idx()]
                    .optimizer
                    .as_mut()
                    .ok_or_else(|| TesseraError::invariant(format!("{input} was not reached")))?;
                producer.register_read(Some((reader, side)));
            }
        }

        for &o in outputs {
            if has_buffer(graph.op(o)?.buffer_type()) {
                self.reads_mut(o)?.add_output_read();
            }
        }

        for &producer in &order {
            let table = self.ops[producer.idx()]
                .optimizer
                .as_mut()
                .ok_or_else(|| TesseraError::invariant(format!("{producer} was not reached")))?
                .peep_all_reader_reads()?;
            for rr in table {
                self.ops[rr.reader.idx()].credits.push(rr);
            }
        }

        ctx.stats.ops_reached = order.len() as u64;
        self.outputs = outputs.to_vec();
        self.optimized = true;
        tracing::debug!(
            reached = order.len(),
            device_ops = self
                .ops
                .iter()
                .filter(|s| s.side == Some(ExecSide::Device))
                .count(),
            "optimize pass resolved"
        );
        Ok(())
    }

    /// Return the completed buffer of `id`, writing it first if this is the first request.
    ///
    /// Inputs are requested recursively before the write.
    pub fn read_or_request_write(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        graph: &OperationGraph,
        id: OpId,
    ) -> TesseraResult<WriteOutcome> {
        if ctx.manager.mode() != PassMode::Exec {
            return Err(TesseraError::invariant(format!(
                "{id} requested outside the exec pass"
            )));
        }
        let st = self.state(id)?;
        if !st.reached {
            return Err(TesseraError::invariant(format!(
                "{id} requested but not resolved by the optimize pass"
            )));
        }
        if self.reads(id)?.is_write_complete {
            return Ok(WriteOutcome::Completed);
        }
        if st.in_progress {
            return Err(TesseraError::invariant(format!("{id} requested while being written")));
        }
        if ctx.breaked.is_set() {
            return Ok(WriteOutcome::Cancelled);
        }

        let op = graph.op(id)?;
        let cache_hit = st.cache_hit;
        let alias_of = st.alias_of;
        let buffer = match (op.buffer_type(), alias_of) {
            (BufferType::NoBufferNoWrite, _) => None,
            (BufferType::Custom, _) => {
                let image = op.custom_buffer().ok_or_else(|| {
                    TesseraError::invariant(format!("{id} is custom but supplies no buffer"))
                })?;
                Some(self.bind_shared(ctx, op, id, image)?)
            }
            (BufferType::Cached, Some(first)) => {
                if self.read_or_request_write(ctx, graph, first)? == WriteOutcome::Cancelled {
                    return Ok(WriteOutcome::Cancelled);
                }
                let image = ctx.cache.lookup(&op.key()).ok_or_else(|| {
                    TesseraError::invariant(format!("{first} left no cache entry to share with {id}"))
                })?;
                ctx.stats.cache_hits += 1;
                Some(self.bind_shared(ctx, op, id, image)?)
            }
            (BufferType::Cached, None) if cache_hit => {
                let image = ctx.cache.lookup(&op.key()).ok_or_else(|| {
                    TesseraError::invariant(format!("cache entry of {id} vanished mid-execution"))
                })?;
                ctx.stats.cache_hits += 1;
                Some(self.bind_shared(ctx, op, id, image)?)
            }
            _ => {
                self.state_mut(id)?.in_progress = true;
                let res = self.write(ctx, graph, op, id);
                self.state_mut(id)?.in_progress = false;
                match res? {
                    Some(buf) => buf,
                    None => return Ok(WriteOutcome::Cancelled),
                }
            }
        };

        self.reads_mut(id)?.complete_write(buffer)?;
        self.credit_producers(ctx, id)?;
        if self.reads(id)?.is_fully_read() {
            self.release(ctx, id)?;
        }
        Ok(WriteOutcome::Completed)
    }

    /// Wrap memory owned by the cache or by the operation. Compute readers get a device copy.
    fn bind_shared(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        op: &dyn Operation,
        id: OpId,
        image: Arc<ImageBuf>,
    ) -> TesseraResult<TmpBuffer> {
        if image.width != op.width()
            || image.height != op.height()
            || image.channels != op.channel_count()
        {
            return Err(TesseraError::validation(format!(
                "{id} ({}) supplies a {}x{}x{} image for a {}x{}x{} output",
                op.kind(),
                image.width,
                image.height,
                image.channels,
                op.width(),
                op.height(),
                op.channel_count()
            )));
        }
        let mut buf = TmpBuffer::new(
            op.width(),
            op.height(),
            op.channel_count(),
            Arc::clone(&ctx.id),
        );
        buf.attach_host(HostMem::shared(image), true)?;
        if self.reads(id)?.has_compute_reads() {
            self.upload_for_compute(ctx, &mut buf)?;
        }
        Ok(buf)
    }

    fn upload_for_compute(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        buf: &mut TmpBuffer,
    ) -> TesseraResult<()> {
        ctx.recycler
            .take_into(buf, RecycleClass::Device, device::reborrow(&mut ctx.device))?;
        let dev = device_of(ctx)?;
        buf.upload(dev)?;
        ctx.stats.host_to_device_copies += 1;
        Ok(())
    }

    /// Write `id` after pulling its inputs. Returns `Ok(None)` when cancelled.
    fn write(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        graph: &OperationGraph,
        op: &dyn Operation,
        id: OpId,
    ) -> TesseraResult<Option<Option<TmpBuffer>>> {
        for &input in op.inputs() {
            if self.read_or_request_write(ctx, graph, input)? == WriteOutcome::Cancelled {
                return Ok(None);
            }
        }

        let side = self.side(id).unwrap_or(ExecSide::Host);
        let mut buffer = self.prepare_for_write(ctx, op, id, side)?;

        let outcome = match side {
            ExecSide::Host => {
                let inputs = self.host_inputs(graph, op)?;
                let target = match buffer.as_mut() {
                    Some(b) => Some(b.host_target_mut()?),
                    None => None,
                };
                ctx.manager.write_on_host(
                    ctx.scheduler,
                    &ctx.breaked,
                    op,
                    &inputs,
                    target,
                    &mut ctx.stats,
                )?
            }
            ExecSide::Device => {
                let kernel = op.kernel().ok_or_else(|| {
                    TesseraError::invariant(format!("{id} placed on the device without a kernel"))
                })?;
                let output = buffer
                    .as_ref()
                    .ok_or_else(|| TesseraError::invariant(format!("{id} has no device buffer")))?
                    .device_handle()?;
                let args = self.device_inputs(graph, op)?;
                let dev = device::reborrow(&mut ctx.device).ok_or_else(|| {
                    TesseraError::invariant(format!("{id} placed on the device without one"))
                })?;
                ctx.manager.write_on_device(
                    dev,
                    &ctx.breaked,
                    op,
                    &kernel,
                    output,
                    &args,
                    &mut ctx.stats,
                )?
            }
        };

        if outcome == WriteOutcome::Cancelled {
            if let Some(buf) = buffer {
                ctx.recycler.give(buf, device::reborrow(&mut ctx.device))?;
            }
            return Ok(None);
        }

        ctx.stats.writes += 1;
        match side {
            ExecSide::Host => ctx.stats.host_writes += 1,
            ExecSide::Device => ctx.stats.device_writes += 1,
        }
        if let Some(buf) = buffer.as_mut() {
            self.prepare_for_read(ctx, op, id, side, buf)?;
        }
        Ok(Some(buffer))
    }

    /// Obtain the write target of `id` according to its buffer type and declared reads.
    fn prepare_for_write(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        op: &dyn Operation,
        id: OpId,
        side: ExecSide,
    ) -> TesseraResult<Option<TmpBuffer>> {
        let (w, h, ch) = (op.width(), op.height(), op.channel_count());
        let mut buf = TmpBuffer::new(w, h, ch, Arc::clone(&ctx.id));
        match op.buffer_type() {
            BufferType::NoBufferWithWrite | BufferType::NoBufferNoWrite => return Ok(None),
            BufferType::Custom => {
                return Err(TesseraError::invariant(format!(
                    "{id} is custom and is never written"
                )));
            }
            BufferType::Cached => {
                let slot = ctx.cache.take_slot(&op.key(), w, h, ch)?;
                buf.attach_host(HostMem::external(slot, w, h, ch), false)?;
                return Ok(Some(buf));
            }
            BufferType::Temporal => {}
        }

        let place = placement(side, self.reads(id)?);
        tracing::trace!(op = %id, kind = op.kind(), ?side, ?place, "placement");
        let mut enqueued = false;
        match place {
            Placement::Host => {
                ctx.recycler.take_into(&mut buf, RecycleClass::Host, None)?;
            }
            Placement::Device => {
                enqueued |= ctx.recycler.take_into(
                    &mut buf,
                    RecycleClass::Device,
                    device::reborrow(&mut ctx.device),
                )?;
            }
            Placement::Both => {
                ctx.recycler.take_into(&mut buf, RecycleClass::Host, None)?;
                enqueued |= ctx.recycler.take_into(
                    &mut buf,
                    RecycleClass::Device,
                    device::reborrow(&mut ctx.device),
                )?;
            }
            Placement::MappedForDevice => {
                enqueued |= ctx.recycler.take_into(
                    &mut buf,
                    RecycleClass::DeviceMapped,
                    device::reborrow(&mut ctx.device),
                )?;
                // Mapped memory may come from the pool with stale contents.
                let mut rows = buf.host_target_mut()?;
                for y in rows.y0()..rows.y1() {
                    rows.row_mut(y).fill(0.0);
                }
            }
            Placement::MappableForHost => {
                enqueued |= ctx.recycler.take_into(
                    &mut buf,
                    RecycleClass::DeviceHostAlloc,
                    device::reborrow(&mut ctx.device),
                )?;
            }
        }
        if side == ExecSide::Device && ctx.manager.write_rect(op) != op.extent() {
            // Pooled device memory keeps whatever the last user wrote.
            let handle = buf.device_handle()?;
            device_of(ctx)?.clear(handle)?;
            ctx.stats.device_clears += 1;
        }
        if enqueued && side == ExecSide::Host {
            device_of(ctx)?.wait_queue_to_finish()?;
        }
        Ok(Some(buf))
    }

    /// After the write, make the result visible on every side that reads it.
    fn prepare_for_read(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        op: &dyn Operation,
        id: OpId,
        side: ExecSide,
        buf: &mut TmpBuffer,
    ) -> TesseraResult<()> {
        if op.buffer_type() == BufferType::Cached {
            buf.mark_host_filled()?;
            let mem = match std::mem::take(&mut buf.host) {
                HostFacet::Filled(m) => m,
                other => {
                    return Err(TesseraError::invariant(format!(
                        "cache write of {id} left host facet {}",
                        other.state_name()
                    )));
                }
            };
            let HostData::Owned(data) = mem.data else {
                return Err(TesseraError::invariant(format!(
                    "cache slot of {id} is not writable memory"
                )));
            };
            let image = ImageBuf {
                width: mem.width,
                height: mem.height,
                channels: mem.channels,
                data,
            };
            let shared = ctx.cache.fill(op.key(), image, op.cache_persistent());
            buf.host = HostFacet::Filled(HostMem::shared(shared));
            if self.reads(id)?.has_compute_reads() {
                self.upload_for_compute(ctx, buf)?;
            }
            return Ok(());
        }

        let place = placement(side, self.reads(id)?);
        match side {
            ExecSide::Host => buf.mark_host_filled()?,
            ExecSide::Device => buf.mark_device_filled()?,
        }
        match (place, side) {
            (Placement::Both, ExecSide::Host) => {
                buf.upload(device_of(ctx)?)?;
                ctx.stats.host_to_device_copies += 1;
            }
            (Placement::Both, ExecSide::Device) => {
                buf.download(device_of(ctx)?)?;
                ctx.stats.device_to_host_copies += 1;
            }
            (Placement::MappedForDevice, _) => {
                buf.unmap(device_of(ctx)?)?;
                ctx.stats.unmaps += 1;
            }
            (Placement::MappableForHost, _) => {
                buf.map_device_to_host(device_of(ctx)?)?;
                ctx.stats.maps += 1;
            }
            _ => {}
        }
        Ok(())
    }

    fn host_inputs<'g>(
        &'g self,
        graph: &'g OperationGraph,
        op: &dyn Operation,
    ) -> TesseraResult<InputSet<'g>> {
        let mut inputs = Vec::with_capacity(op.inputs().len());
        for &input in op.inputs() {
            let producer = graph.op(input)?;
            if let Some(v) = single_element(producer, input)? {
                inputs.push(InputPixels::SingleElement(v));
                continue;
            }
            let buf = self.reads(input)?.buffer()?.ok_or_else(|| {
                TesseraError::invariant(format!("{input} ({}) has no pixels", producer.kind()))
            })?;
            inputs.push(InputPixels::Host(buf.host_view()?));
        }
        Ok(InputSet::new(inputs))
    }

    fn device_inputs(
        &self,
        graph: &OperationGraph,
        op: &dyn Operation,
    ) -> TesseraResult<Vec<KernelArg>> {
        let mut args = Vec::with_capacity(op.inputs().len());
        for &input in op.inputs() {
            let producer = graph.op(input)?;
            if let Some(v) = single_element(producer, input)? {
                args.push(KernelArg::Elem(SmallVec::from_slice(v)));
                continue;
            }
            let buf = self.reads(input)?.buffer()?.ok_or_else(|| {
                TesseraError::invariant(format!("{input} ({}) has no pixels", producer.kind()))
            })?;
            if !buf.device_readable() {
                return Err(TesseraError::invariant(format!(
                    "{input} has no device copy for a device reader"
                )));
            }
            args.push(KernelArg::Input(buf.device_handle()?));
        }
        Ok(args)
    }

    /// Report the reads `reader` made on each of its producers and release exhausted ones.
    fn credit_producers(&mut self, ctx: &mut ExecutionContext<'_>, reader: OpId) -> TesseraResult<()> {
        let credits = std::mem::take(&mut self.state_mut(reader)?.credits);
        for rr in credits {
            let done = self
                .reads_mut(rr.producer)?
                .consume(rr.cpu_reads, rr.compute_reads)?;
            if done {
                self.release(ctx, rr.producer)?;
            }
        }
        Ok(())
    }

    fn release(&mut self, ctx: &mut ExecutionContext<'_>, id: OpId) -> TesseraResult<()> {
        if let Some(buf) = self.reads_mut(id)?.release()? {
            tracing::trace!(op = %id, host = buf.host_state(), device = buf.device_state(), "release");
            ctx.recycler.give(buf, device::reborrow(&mut ctx.device))?;
        }
        ctx.stats.releases += 1;
        Ok(())
    }

    /// Copy a requested output to host memory and report its read.
    ///
    /// Operations without a buffer yield a constant image (single element) or nothing (sinks).
    pub fn collect_output(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        graph: &OperationGraph,
        id: OpId,
    ) -> TesseraResult<Option<ImageBuf>> {
        let op = graph.op(id)?;
        if !has_buffer(op.buffer_type()) {
            let Some(v) = single_element(op, id)? else {
                return Ok(None);
            };
            let ch = v.len();
            return Ok(Some(ImageBuf::from_fn(
                op.width(),
                op.height(),
                ch as u32,
                |_, _, px| px.copy_from_slice(&v[..ch]),
            )));
        }
        if !self.outputs.contains(&id) {
            return Err(TesseraError::invariant(format!("{id} is not a requested output")));
        }
        let image = self
            .reads(id)?
            .buffer()?
            .ok_or_else(|| TesseraError::invariant(format!("{id} produced no buffer")))?
            .host_view()?
            .to_image();
        if self.reads_mut(id)?.consume(1, 0)? {
            self.release(ctx, id)?;
        }
        Ok(Some(image))
    }

    /// Release every buffer still held, ignoring read counts. Used after a cancelled or failed
    /// execution.
    pub fn abandon(&mut self, ctx: &mut ExecutionContext<'_>) -> TesseraResult<usize> {
        let mut returned = 0;
        for st in &mut self.ops {
            let Some(optimizer) = st.optimizer.as_mut() else {
                continue;
            };
            let Ok(reads) = optimizer.peep_reads_mut() else {
                continue;
            };
            if let Some(buf) = reads.abandon() {
                ctx.recycler.give(buf, device::reborrow(&mut ctx.device))?;
                returned += 1;
            }
        }
        Ok(returned)
    }

    /// Verify that every written operation was released.
    pub fn check_released(&self) -> TesseraResult<()> {
        for (i, st) in self.ops.iter().enumerate() {
            let Some(optimizer) = st.optimizer.as_ref() else {
                continue;
            };
            let reads = optimizer.peep_reads()?;
            if reads.is_write_complete && !reads.is_released() {
                return Err(TesseraError::invariant(format!(
                    "{} still holds its buffer with {} reads pending",
                    OpId(i as u32),
                    reads.pending()
                )));
            }
        }
        Ok(())
    }
}

fn has_buffer(t: BufferType) -> bool {
    matches!(
        t,
        BufferType::Temporal | BufferType::Cached | BufferType::Custom
    )
}

/// Whether `op` pulls its inputs: only operations that will actually be written do.
fn expands(op: &dyn Operation, cache_hit: bool) -> bool {
    !cache_hit && op.buffer_type().writes()
}

fn single_element(op: &dyn Operation, id: OpId) -> TesseraResult<Option<&[f32]>> {
    if !op.is_single_element() {
        return Ok(None);
    }
    op.single_element_value().map(Some).ok_or_else(|| {
        TesseraError::invariant(format!("{id} ({}) is single-element without a value", op.kind()))
    })
}

fn device_of<'c>(ctx: &'c mut ExecutionContext<'_>) -> TesseraResult<&'c mut dyn Device> {
    device::reborrow(&mut ctx.device)
        .ok_or_else(|| TesseraError::invariant("device work requested without a device"))
}

#[cfg(test)]
#[path = "../../tests/unit/exec/buffer_manager.rs"]
mod tests;

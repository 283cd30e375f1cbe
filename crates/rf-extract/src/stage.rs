//! The reframing stage.
//!
//! [`Reframer`] is driven by repeated calls to [`Reframer::process`]. Each
//! call pulls what the lanes need from the [`Host`], advances the session
//! state machine as far as the available input allows and reports how the
//! host should schedule the next call. The stage never blocks.
//!
//! ```text
//! NoRange ─▶ Locating ─▶ Active ─▶ Exhausted ─▶ NoRange … ─▶ Done
//! ```
//!
//! While `Locating`, sync-constrained lanes search for their start sync
//! point. The range only becomes `Active` once every lane knows where it
//! starts, so no lane emits a packet of a range before all of them can.

use rf_core::config::{ReframerConfig, XRound};
use rf_core::{ChunkInfo, Error, LaneId, LaneInfo, Rational, Result, StreamCategory};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::classify::{classify, Placement, Window};
use crate::clock::{Clock, SystemClock};
use crate::host::Host;
use crate::lane::{LaneState, Located, Queued, StartState, StartTarget};
use crate::pacer::{Pace, Pacer};
use crate::plan::{self, ExtractMode, Plan, RangePoint};
use crate::resolver::{self, LaneView, Resolution, Sample, SizePolicy, SplitRule};
use crate::rewrite::{self, Cut};
use crate::session::{Phase, RangeEnd, Session};
use crate::utc::{UtcAnchor, UtcProbe, UtcStatus};

/// Packets pulled per lane and call, and the queue depth a lane keeps when
/// it is not starved.
pub const LOOKAHEAD: usize = 32;

/// What the host should do after a call to [`Reframer::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Something moved; call again.
    Progress,
    /// Waiting on upstream input.
    Idle,
    /// Call again after this delay.
    Reschedule(Duration),
    /// Every output lane has ended.
    Finished,
}

#[derive(Debug, Default)]
struct Round {
    progress: bool,
    wait: Option<Duration>,
}

impl Round {
    fn wait(&mut self, after: Duration) {
        self.wait = Some(self.wait.map_or(after, |w| w.min(after)));
    }

    fn into_tick(self) -> Tick {
        match (self.progress, self.wait) {
            (true, _) => Tick::Progress,
            (false, Some(after)) => Tick::Reschedule(after),
            (false, None) => Tick::Idle,
        }
    }
}

/// Chunk metadata and counters shared by every packet forwarded in one round.
struct EmitContext {
    chunk: u32,
    label: String,
    props: Vec<(String, String)>,
    frame_offset: u64,
    file_boundary: bool,
    tcmdrw: bool,
    index_lane: Option<LaneId>,
}

/// What one forwarded packet adds to the range counters.
struct Emitted {
    end: Rational,
    bytes: u64,
    video_frame: bool,
}

/// The reframing and range-extraction stage.
pub struct Reframer {
    cfg: ReframerConfig,
    plan: Plan,
    session: Session,
    lanes: BTreeMap<LaneId, LaneState>,
    pacer: Pacer,
    utc: UtcProbe,
    clock: Box<dyn Clock>,
    failure: Option<Error>,
    finished: bool,
}

impl Reframer {
    pub fn new(cfg: ReframerConfig) -> Self {
        Self::with_clock(cfg, Box::new(SystemClock::default()))
    }

    pub fn with_clock(cfg: ReframerConfig, clock: Box<dyn Clock>) -> Self {
        for warning in cfg.validate() {
            tracing::warn!("Config: {warning}");
        }
        let plan = plan::plan(&cfg);
        tracing::info!(
            "Reframer configured: {} mode, {} range(s)",
            plan.mode,
            plan.ranges.len()
        );

        Self {
            session: Session::new(&plan, &cfg),
            pacer: Pacer::new(cfg.rt, cfg.effective_speed()),
            utc: UtcProbe::new(cfg.utc_ref, cfg.utc_probe),
            cfg,
            plan,
            lanes: BTreeMap::new(),
            clock,
            failure: None,
            finished: false,
        }
    }

    pub fn config(&self) -> &ReframerConfig {
        &self.cfg
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn phase(&self) -> Phase {
        self.session.phase
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The error that stopped the session, if any.
    pub fn failure(&self) -> Option<&Error> {
        self.failure.as_ref()
    }

    // -----------------------------------------------------------------------
    // Lane management
    // -----------------------------------------------------------------------

    pub fn attach_lane(&mut self, id: LaneId, info: LaneInfo) {
        tracing::debug!("Lane {id} attached: {} ({})", info.name, info.category);
        let mut lane = LaneState::new(id, info, &self.cfg);

        if self.session.phase == Phase::Active {
            if let Some(origin) = self.session.active().and_then(|r| r.origin) {
                activate_lane(
                    &mut lane,
                    origin,
                    self.session.output_offset(),
                    &self.cfg,
                );
            }
        }

        if self.lanes.insert(id, lane).is_some() {
            tracing::warn!("Lane {id} attached twice; previous state discarded");
        }
    }

    pub fn detach_lane(&mut self, id: LaneId) -> Result<LaneInfo> {
        let lane = self.lanes.remove(&id).ok_or(Error::UnknownLane(id.0))?;
        tracing::debug!("Lane {id} detached with {} queued packets", lane.fifo.len());
        Ok(lane.info)
    }

    /// Whether the host should deliver this kind of stream decoded.
    pub fn wants_decoded(&self, category: StreamCategory) -> bool {
        self.cfg.raw.applies_to(category)
    }

    /// Downstream no longer wants a lane: drop its queue and stop upstream.
    pub fn stop_lane(&mut self, host: &mut dyn Host, id: LaneId) -> Result<()> {
        let lane = self.lanes.get_mut(&id).ok_or(Error::UnknownLane(id.0))?;
        lane.stopped = true;
        lane.fifo.clear();
        host.send_stop(id);
        tracing::debug!("Lane {id} stopped");
        Ok(())
    }

    /// Resume a stopped lane from `position`. The lane looks for its start
    /// in the active range again, as if it had just been attached.
    pub fn play_lane(&mut self, host: &mut dyn Host, id: LaneId, position: Rational) -> Result<()> {
        let lane = self.lanes.get_mut(&id).ok_or(Error::UnknownLane(id.0))?;
        lane.stopped = false;
        lane.eos = false;
        lane.fifo.clear();
        lane.last_forwarded_end = None;
        lane.last_sync_emitted = None;
        lane.reset_for_range(false);

        if self.session.phase == Phase::Active {
            if let Some(origin) = self.session.active().and_then(|r| r.origin) {
                activate_lane(lane, origin, self.session.output_offset(), &self.cfg);
            }
        }
        host.send_play(id, position);
        tracing::debug!("Lane {id} playing from {position}");
        Ok(())
    }

    /// End the session now: every lane is done and every output ends.
    pub fn abort(&mut self, host: &mut dyn Host) {
        tracing::info!("Session aborted");
        for lane in self.lanes.values_mut() {
            lane.fifo.clear();
            end_lane_output(host, lane);
        }
        self.session.phase = Phase::Done;
        self.finished = true;
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Run the stage once. A fatal error is returned again on every later
    /// call.
    pub fn process(&mut self, host: &mut dyn Host) -> Result<Tick> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        if self.finished {
            return Ok(Tick::Finished);
        }

        let result = match self.plan.fatal.clone() {
            Some(err) => Err(err),
            None if self.session.mode() == ExtractMode::None => self.pass_through(host),
            None => self.extract(host),
        };

        match result {
            Ok(Tick::Reschedule(after)) => {
                host.request_reschedule(after);
                Ok(Tick::Reschedule(after))
            }
            Ok(tick) => Ok(tick),
            Err(err) => {
                tracing::error!("Reframer failed ({} error): {err}", err.category());
                self.abort(host);
                self.failure = Some(err.clone());
                Err(err)
            }
        }
    }

    /// No extraction: filter, pace and forward packets untouched.
    fn pass_through(&mut self, host: &mut dyn Host) -> Result<Tick> {
        let mut round = Round::default();
        let now = self.clock.now_micros();

        for lane in self.lanes.values_mut() {
            if lane.done || lane.stopped {
                continue;
            }
            loop {
                let Some(next) = host.next_input(lane.id) else {
                    if host.is_eos(lane.id) {
                        end_lane_output(host, lane);
                        round.progress = true;
                    }
                    break;
                };

                let admitted = lane.admits(next, &self.cfg);
                if admitted {
                    let media_us = lane.to_rational(lane.media_of(next)).to_micros();
                    if let Pace::Wait(after) = self.pacer.check(lane.id, media_us, now) {
                        round.wait(after);
                        break;
                    }
                }

                let Some(packet) = host.drop_input(lane.id) else {
                    break;
                };
                lane.frames_seen += 1;
                round.progress = true;
                if admitted {
                    host.push_output(lane.id, packet.detach());
                }

                if lane.frames_exhausted(&self.cfg) {
                    tracing::debug!("Lane {} passed its last listed frame", lane.id);
                    host.send_stop(lane.id);
                    end_lane_output(host, lane);
                    break;
                }
            }
        }

        if !self.lanes.is_empty() && self.lanes.values().all(|l| l.done || l.stopped) {
            for lane in self.lanes.values_mut() {
                end_lane_output(host, lane);
            }
            tracing::info!("Pass-through finished");
            self.finished = true;
            return Ok(Tick::Finished);
        }
        Ok(round.into_tick())
    }

    fn extract(&mut self, host: &mut dyn Host) -> Result<Tick> {
        if self.lanes.is_empty() {
            return Ok(Tick::Idle);
        }

        let mut round = Round::default();
        loop {
            match self.session.phase {
                Phase::NoRange => {
                    round.progress = true;
                    if !self.begin_range(host)? {
                        self.session.phase = Phase::Done;
                    }
                }
                Phase::Locating => {
                    round.progress |= self.pull_inputs(host)?;
                    if !self.locate(host, &mut round)? {
                        break;
                    }
                    round.progress = true;
                }
                Phase::Active => {
                    round.progress |= self.pull_inputs(host)?;
                    self.refresh_end();
                    round.progress |= self.drain(host, &mut round)?;
                    if !self.lanes.values().all(LaneState::is_exhausted) {
                        break;
                    }
                    self.session.phase = Phase::Exhausted;
                    round.progress = true;
                }
                Phase::Exhausted => self.finish_range(),
                Phase::Done => {
                    self.finish_session(host);
                    return Ok(Tick::Finished);
                }
            }
        }
        Ok(round.into_tick())
    }

    // -----------------------------------------------------------------------
    // Input
    // -----------------------------------------------------------------------

    /// Move packets from the host into lane queues.
    fn pull_inputs(&mut self, host: &mut dyn Host) -> Result<bool> {
        let split = self.session.mode().is_split();
        let now = self.clock.now_micros();
        let local_utc = self.clock.utc_millis();
        let mut progress = false;

        for lane in self.lanes.values_mut() {
            if lane.done || lane.stopped || lane.eos {
                continue;
            }

            let mut taken = 0;
            while taken < LOOKAHEAD && (lane.starved || lane.fifo.len() < LOOKAHEAD) {
                let admitted = match host.next_input(lane.id) {
                    Some(next) => lane.admits(next, &self.cfg),
                    None => {
                        if host.is_eos(lane.id) {
                            tracing::debug!("Lane {} reached end of stream", lane.id);
                            lane.eos = true;
                            progress = true;
                        }
                        break;
                    }
                };
                let Some(packet) = host.drop_input(lane.id) else {
                    break;
                };
                lane.frames_seen += 1;
                taken += 1;
                progress = true;

                if admitted {
                    if packet.transient && split {
                        return Err(Error::NonReleasableBuffer { lane: lane.id.0 });
                    }
                    let packet = packet.detach();
                    lane.note_packet(&packet);
                    let media_us = lane.to_rational(lane.media_of(&packet)).to_micros();
                    self.utc.observe(media_us, packet.utc_ms, now, local_utc);
                    let utc_ms = self.utc.derive(media_us, packet.utc_ms);
                    lane.enqueue(packet, utc_ms);
                }

                if lane.frames_exhausted(&self.cfg) {
                    tracing::debug!("Lane {} passed its last listed frame", lane.id);
                    host.send_stop(lane.id);
                    lane.eos = true;
                    break;
                }
            }
        }
        Ok(progress)
    }

    /// Drop every queue and restart all sources at `position`.
    fn reposition(&mut self, host: &mut dyn Host, position: Rational, from_start: bool) {
        self.pacer.reset();
        for lane in self.lanes.values_mut() {
            lane.fifo.clear();
            lane.eos = false;
            lane.last_forwarded_end = None;
            lane.last_sync_emitted = None;
            if from_start {
                lane.frames_seen = 0;
            }
            host.send_seek(lane.id, position);
        }
    }

    // -----------------------------------------------------------------------
    // Range start
    // -----------------------------------------------------------------------

    /// Load the next range and reposition the input when needed. Returns
    /// `false` when no range is left.
    fn begin_range(&mut self, host: &mut dyn Host) -> Result<bool> {
        let Some(range) = self.session.load_next_range() else {
            return Ok(false);
        };
        let (index, chunk, start, file_boundary) =
            (range.index, range.chunk, range.start, range.file_boundary);
        tracing::info!("Range {chunk} ({}) starting at {start}", range.label);

        let safety = Rational::from_secs_f64(self.cfg.seeksafe.max(0.0));
        let seekable = self.lanes.keys().all(|&id| host.can_seek(id));

        if self.session.needs_rewind(&start) {
            if !seekable {
                return Err(Error::out_of_order(index, start));
            }
            let (position, from_start) = match start {
                RangePoint::Time(t) => ((t - safety).max(Rational::ZERO), false),
                _ => (Rational::ZERO, true),
            };
            tracing::info!("Range {chunk} starts before consumed input; seeking to {position}");
            self.reposition(host, position, from_start);
            self.session.note_rewound();
        } else if let RangePoint::Time(t) = start {
            let consumed = self
                .lanes
                .values()
                .filter_map(|l| l.tail().map(|tail| l.to_rational(tail)))
                .max()
                .unwrap_or(Rational::ZERO);
            let position = t - safety;
            if self.session.mode() == ExtractMode::Range && seekable && position > consumed {
                tracing::debug!("Skipping ahead from {consumed} to {position}");
                self.reposition(host, position, false);
            }
        }

        for lane in self.lanes.values_mut() {
            lane.reset_for_range(file_boundary);
        }
        Ok(true)
    }

    fn utc_status(&self) -> UtcStatus {
        self.utc.status(self.clock.now_micros())
    }

    fn all_drained(&self) -> bool {
        self.lanes.values().all(|l| l.eos && l.fifo.is_empty())
    }

    /// Search for the start of the active range. Returns `true` once the
    /// range is active on every lane.
    fn locate(&mut self, host: &mut dyn Host, round: &mut Round) -> Result<bool> {
        let Some(range) = self.session.active() else {
            return Ok(true);
        };
        let (start, end, chunk, known) = (range.start, range.end, range.chunk, range.start_time);
        let exact = self.cfg.xround == XRound::Seek || self.cfg.nosap;

        let start_time = match known {
            Some(t) => t,
            None => {
                let resolved = match start {
                    RangePoint::Time(t) => Some(t),
                    RangePoint::Utc(at) => match self.utc_status() {
                        UtcStatus::Mapped(anchor) => self.locate_utc(at.timestamp_millis(), anchor),
                        UtcStatus::Deferred(_) if self.all_drained() => Some(Rational::ZERO),
                        UtcStatus::Deferred(wait) => {
                            if let Some(after) = wait {
                                round.wait(after);
                            }
                            None
                        }
                        UtcStatus::TimedOut => {
                            return Err(Error::UtcProbeTimeout {
                                timeout_ms: self.cfg.utc_probe,
                            })
                        }
                    },
                    RangePoint::Frame(n) => self.locate_frame(n, exact),
                };
                let Some(t) = resolved else {
                    return Ok(false);
                };
                tracing::debug!("Range {chunk} start {start} resolved to {t}s");
                if let Some(active) = self.session.active_mut() {
                    active.start_time = Some(t);
                }
                t
            }
        };

        // Sync-constrained lanes pick their start sync point.
        let mut ready = true;
        let mut forwarded_group: Option<Rational> = None;
        for lane in self.lanes.values_mut() {
            if !lane.strategy.constrained
                || lane.start != StartState::AwaitingStart
                || lane.is_exhausted()
            {
                continue;
            }
            let goal = lane.to_ticks(start_time);
            match lane.locate_sync_start(StartTarget::Time(goal), self.cfg.xround) {
                Located::At(media) => {
                    tracing::debug!("Lane {} starts on sync point {media}", lane.id);
                    lane.start = StartState::StartAt(media);
                    lane.sync_start = Some(media);
                    lane.starved = false;
                }
                Located::Consumed(sync) => {
                    tracing::debug!(
                        "Lane {} continues the group at {sync} forwarded by the previous range",
                        lane.id
                    );
                    lane.start = StartState::StartAt(goal);
                    lane.sync_start = Some(sync);
                    lane.continues = true;
                    lane.starved = false;
                    let at = lane.to_rational(sync);
                    forwarded_group = Some(forwarded_group.map_or(at, |g| g.min(at)));
                }
                Located::EndOfStream => lane.start = StartState::EndOfStreamBeforeStart,
                Located::Pending => {
                    lane.starved = true;
                    ready = false;
                }
            }
        }

        // A seekable source goes back to the sync point so the range can
        // start on it; otherwise the range picks up where the previous one
        // stopped.
        if let Some(position) = forwarded_group {
            let seekable = self.lanes.keys().all(|&id| host.can_seek(id));
            if seekable && !self.session.mode().is_split() {
                tracing::info!("Range {chunk} starts in a group already forwarded; seeking back to {position}");
                for lane in self.lanes.values_mut() {
                    if let Some((frame, media)) = lane.last_sync_emitted {
                        if lane.to_rational(media) == position {
                            lane.frames_seen = frame.saturating_sub(1);
                        }
                    }
                    lane.reset_for_range(false);
                }
                self.reposition(host, position, false);
                self.session.note_rewound();
                round.progress = true;
                return Ok(false);
            }
        }

        if !ready {
            return Ok(false);
        }

        let origin = if exact {
            start_time
        } else {
            self.lanes
                .values()
                .filter_map(|l| match l.start {
                    StartState::StartAt(_) if l.strategy.constrained && l.continues => {
                        Some(start_time)
                    }
                    StartState::StartAt(m) if l.strategy.constrained => Some(l.to_rational(m)),
                    _ => None,
                })
                .min()
                .unwrap_or(start_time)
        };

        let offset = self.session.output_offset();
        for lane in self.lanes.values_mut() {
            activate_lane(lane, origin, offset, &self.cfg);
        }

        let stop = self.initial_end(end, origin);
        tracing::info!("Range {chunk} active from {origin}s, end {stop:?}");
        if let Some(active) = self.session.active_mut() {
            active.origin = Some(origin);
            active.stop = stop;
        }
        self.session.phase = Phase::Active;
        Ok(true)
    }

    /// Time of frame `n` on the index lane, or `None` while it has not been
    /// reached.
    fn locate_frame(&mut self, n: u64, exact: bool) -> Option<Rational> {
        let index = index_lane(&self.lanes)?;
        let lane = self.lanes.get_mut(&index)?;

        if lane.strategy.constrained {
            match lane.locate_sync_start(StartTarget::Frame(n), self.cfg.xround) {
                Located::Pending => {
                    lane.starved = true;
                    return None;
                }
                Located::EndOfStream => return Some(end_of_lane(lane)),
                Located::At(media) if !exact => return Some(lane.to_rational(media)),
                Located::At(_) | Located::Consumed(_) => {}
            }
        }

        match lane.fifo.iter().find(|q| q.frame >= n) {
            Some(q) => Some(lane.to_rational(q.media)),
            None if lane.eos => Some(end_of_lane(lane)),
            None => {
                if !lane.strategy.constrained {
                    lane.fifo.retain(|q| q.frame >= n);
                }
                lane.starved = true;
                None
            }
        }
    }

    /// Time of the first packet on the index lane whose UTC instant is at or
    /// after `at_ms`, or `None` while it has not been reached.
    fn locate_utc(&mut self, at_ms: i64, anchor: UtcAnchor) -> Option<Rational> {
        let index = index_lane(&self.lanes)?;
        let lane = self.lanes.get_mut(&index)?;

        let found = lane
            .fifo
            .iter()
            .find(|q| packet_utc(lane, q, Some(anchor)).is_some_and(|utc| utc >= at_ms))
            .map(|q| q.media);

        match found {
            Some(media) => Some(lane.to_rational(media)),
            None if lane.eos => Some(end_of_lane(lane)),
            None => {
                // Everything queued is before the start.
                let keep_from = if lane.strategy.constrained {
                    lane.fifo.iter().rposition(|q| lane.is_sync(q)).unwrap_or(0)
                } else {
                    lane.fifo.len().saturating_sub(1)
                };
                lane.fifo.drain(..keep_from);
                lane.starved = true;
                None
            }
        }
    }

    fn split_rule(&self) -> Option<SplitRule> {
        match self.session.mode() {
            ExtractMode::DurationSplit(d) => Some(SplitRule::Duration(d)),
            ExtractMode::SizeSplit(target) => Some(SplitRule::Size {
                target,
                policy: SizePolicy::from(self.cfg.xround),
            }),
            ExtractMode::SapSplit => Some(SplitRule::Sap),
            ExtractMode::None | ExtractMode::Range => None,
        }
    }

    fn initial_end(&self, end: Option<RangePoint>, origin: Rational) -> RangeEnd {
        let pending = RangeEnd::Pending { horizon: origin };
        if self.split_rule().is_some() {
            return pending;
        }
        match end {
            None => RangeEnd::Open,
            Some(RangePoint::Time(e)) => {
                if self.cfg.xadjust && self.lanes.values().any(|l| l.strategy.constrained) {
                    pending
                } else {
                    RangeEnd::At(e)
                }
            }
            Some(RangePoint::Frame(_) | RangePoint::Utc(_)) => pending,
        }
    }

    // -----------------------------------------------------------------------
    // Range end
    // -----------------------------------------------------------------------

    /// Try to settle a pending end from what the lanes hold now.
    fn refresh_end(&mut self) {
        let Some(range) = self.session.active() else {
            return;
        };
        let RangeEnd::Pending { .. } = range.stop else {
            return;
        };
        let origin = range.origin.unwrap_or(Rational::ZERO);

        let stop = match (self.split_rule(), range.end) {
            (Some(rule), _) => self.resolve_split(rule, origin),
            (None, Some(RangePoint::Frame(m))) => self.resolve_frame_end(m, origin),
            (None, Some(RangePoint::Time(e))) => self.resolve_adjusted_end(e, origin),
            (None, Some(RangePoint::Utc(at))) => self.resolve_utc_end(at.timestamp_millis(), origin),
            (None, _) => RangeEnd::Open,
        };

        if let Some(active) = self.session.active_mut() {
            if !matches!(stop, RangeEnd::Pending { .. }) {
                tracing::debug!("Range {} end settled: {stop:?}", active.chunk);
            }
            active.stop = stop;
        }
    }

    fn resolve_split(&self, rule: SplitRule, origin: Rational) -> RangeEnd {
        let views: Vec<LaneView> = self
            .lanes
            .values()
            .filter(|l| !l.done && !l.stopped)
            .map(|l| LaneView {
                samples: l
                    .fifo
                    .iter()
                    .map(|q| Sample {
                        time: l.to_rational(q.media),
                        end: l.to_rational(q.end()),
                        size: q.packet.size() as u64,
                        sync: l.is_sync(q),
                    })
                    .collect(),
                eos: l.eos,
                boundary: l.strategy.constrained,
                sparse: l.info.category.is_sparse(),
            })
            .collect();

        match resolver::resolve(rule, origin, self.session.chunk_bytes, &views) {
            Resolution::Cut(cut) => RangeEnd::At(cut),
            Resolution::Final => RangeEnd::Open,
            Resolution::Pending { safe_until } => RangeEnd::Pending {
                horizon: safe_until.unwrap_or(origin).max(origin),
            },
        }
    }

    /// The end is the time of frame `m` on the index lane (exclusive).
    fn resolve_frame_end(&self, m: u64, origin: Rational) -> RangeEnd {
        let Some(lane) = index_lane(&self.lanes).and_then(|id| self.lanes.get(&id)) else {
            return RangeEnd::Open;
        };
        if let Some(q) = lane.fifo.iter().find(|q| q.frame >= m) {
            return RangeEnd::At(lane.to_rational(q.media));
        }
        if lane.eos {
            return RangeEnd::Open;
        }
        let horizon = lane
            .fifo
            .back()
            .map(|q| q.media)
            .or(lane.last_forwarded_end)
            .map(|t| lane.to_rational(t))
            .unwrap_or(origin);
        RangeEnd::Pending {
            horizon: horizon.max(origin),
        }
    }

    /// The end is the first packet on the index lane whose UTC instant is at
    /// or after `at_ms` (exclusive).
    fn resolve_utc_end(&self, at_ms: i64, origin: Rational) -> RangeEnd {
        let Some(lane) = index_lane(&self.lanes).and_then(|id| self.lanes.get(&id)) else {
            return RangeEnd::Open;
        };
        let anchor = self.utc.anchor();
        if let Some(q) = lane
            .fifo
            .iter()
            .find(|q| packet_utc(lane, q, anchor).is_some_and(|utc| utc >= at_ms))
        {
            return RangeEnd::At(lane.to_rational(q.media).max(origin));
        }
        if lane.eos || lane.is_exhausted() {
            if anchor.is_none() {
                tracing::warn!("No UTC mapping for range end {at_ms} ms; leaving the range open");
            }
            return RangeEnd::Open;
        }
        let horizon = lane
            .fifo
            .back()
            .map(|q| q.media)
            .or(lane.last_forwarded_end)
            .map(|t| lane.to_rational(t))
            .unwrap_or(origin);
        RangeEnd::Pending {
            horizon: horizon.max(origin),
        }
    }

    /// Snap `end` back to the last sync point at or before it on every
    /// constrained lane and keep the earliest.
    fn resolve_adjusted_end(&self, end: Rational, origin: Rational) -> RangeEnd {
        let mut snapped: Option<Rational> = None;
        let mut settled = true;

        for lane in self
            .lanes
            .values()
            .filter(|l| l.strategy.constrained && matches!(l.start, StartState::StartAt(_)))
        {
            let goal = lane.to_ticks(end);
            let queued = lane
                .fifo
                .iter()
                .filter(|q| lane.is_sync(q) && q.media <= goal)
                .map(|q| q.media)
                .max();
            let latest = queued
                .max(lane.last_sync_forwarded.filter(|&s| s <= goal))
                .map(|t| lane.to_rational(t))
                .unwrap_or(origin);
            if !(lane.eos || lane.fifo.back().is_some_and(|q| q.media >= goal)) {
                settled = false;
            }
            snapped = Some(snapped.map_or(latest, |s| s.min(latest)));
        }

        match snapped {
            None => RangeEnd::At(end),
            Some(s) if settled && s > origin => RangeEnd::At(s),
            Some(_) if settled => RangeEnd::At(end),
            Some(s) => RangeEnd::Pending {
                horizon: s.max(origin),
            },
        }
    }

    fn finish_range(&mut self) {
        let forwarded: u64 = self.lanes.values().map(|l| l.forwarded_in_range).sum();
        if let Some(range) = self.session.finish_range() {
            tracing::info!(
                "Range {} finished: {forwarded} packets, end {:?}",
                range.chunk,
                range.stop
            );
        }
    }

    fn finish_session(&mut self, host: &mut dyn Host) {
        for lane in self.lanes.values_mut() {
            if !lane.eos && !lane.done && !lane.stopped {
                host.send_stop(lane.id);
            }
            lane.fifo.clear();
            end_lane_output(host, lane);
        }
        self.finished = true;
        tracing::info!("Extraction finished");
    }

    // -----------------------------------------------------------------------
    // Output
    // -----------------------------------------------------------------------

    /// Forward every packet the active range allows right now.
    fn drain(&mut self, host: &mut dyn Host, round: &mut Round) -> Result<bool> {
        let Some(range) = self.session.active() else {
            return Ok(false);
        };
        let stop = range.stop;
        let ctx = EmitContext {
            chunk: range.chunk,
            label: range.label.clone(),
            props: range.props.clone(),
            frame_offset: range.frame_offset,
            file_boundary: range.file_boundary,
            tcmdrw: self.cfg.tcmdrw,
            index_lane: index_lane(&self.lanes),
        };
        let seek_mode = self.cfg.xround == XRound::Seek;
        let now = self.clock.now_micros();

        let mut progress = false;
        let mut media_end: Option<Rational> = None;
        let mut video_frames = 0;
        let mut bytes = 0;

        for lane in self.lanes.values_mut() {
            if lane.is_exhausted() {
                continue;
            }
            lane.starved = false;

            let (end, horizon) = match stop {
                RangeEnd::Open => (None, None),
                RangeEnd::At(e) => (Some(lane.to_end_ticks(e)), None),
                RangeEnd::Pending { horizon } => (None, Some(lane.to_ticks(horizon))),
            };
            let window = Window {
                start: lane.window_start,
                end,
            };

            loop {
                let Some(front) = lane.fifo.front() else {
                    if lane.eos {
                        lane.range_done = true;
                    } else {
                        lane.starved = true;
                    }
                    break;
                };

                // A lane that joined mid-range waits for its first sync point.
                if lane.strategy.constrained && lane.sync_start.is_none() {
                    if lane.is_sync(front) && front.media >= window.start {
                        lane.sync_start = Some(front.media);
                    } else {
                        lane.fifo.pop_front();
                        progress = true;
                        continue;
                    }
                }

                let placement = classify(
                    front.media,
                    front.packet.duration as u64,
                    window,
                    lane.strategy.rounding,
                );
                let (cut, decode_only) = match placement {
                    Placement::Before
                        if seek_mode && lane.sync_start.is_some_and(|s| front.media >= s) =>
                    {
                        (Cut::default(), true)
                    }
                    Placement::Before => {
                        lane.fifo.pop_front();
                        progress = true;
                        continue;
                    }
                    Placement::After => {
                        if let (true, Some(end)) = (self.cfg.probe_ref, end) {
                            forward_reference_overlap(lane, end, &ctx, host)?;
                        }
                        lane.range_done = true;
                        break;
                    }
                    Placement::In { discard, keep } => (Cut { discard, keep }, false),
                };

                if horizon.is_some_and(|h| front.end() > h) {
                    lane.starved = true;
                    break;
                }

                let media_us = lane.to_rational(front.media).to_micros();
                if let Pace::Wait(after) = self.pacer.check(lane.id, media_us, now) {
                    round.wait(after);
                    break;
                }

                let Some(entry) = lane.fifo.pop_front() else {
                    break;
                };
                let emitted = emit(lane, entry, cut, decode_only, &ctx, host)?;
                progress = true;
                media_end = Some(media_end.map_or(emitted.end, |e| e.max(emitted.end)));
                bytes += emitted.bytes;
                if emitted.video_frame {
                    video_frames += 1;
                }
            }
        }

        self.session.video_frames += video_frames;
        self.session.chunk_bytes += bytes;
        if let (Some(end), Some(active)) = (media_end, self.session.active_mut()) {
            active.note_forwarded_end(end);
        }
        Ok(progress)
    }
}

// ---------------------------------------------------------------------------
// Lane helpers
// ---------------------------------------------------------------------------

/// The lane frame ranges count on: the first video lane, else the first lane.
fn index_lane(lanes: &BTreeMap<LaneId, LaneState>) -> Option<LaneId> {
    lanes
        .values()
        .find(|l| l.info.category == StreamCategory::Video)
        .or_else(|| lanes.values().next())
        .map(|l| l.id)
}

fn end_of_lane(lane: &LaneState) -> Rational {
    lane.tail()
        .map(|t| lane.to_rational(t))
        .unwrap_or(Rational::ZERO)
}

/// UTC instant of a queued packet: the one derived when it was taken, else
/// extrapolated from `fallback`.
fn packet_utc(lane: &LaneState, q: &Queued, fallback: Option<UtcAnchor>) -> Option<i64> {
    q.utc_ms
        .or_else(|| fallback.map(|anchor| anchor.utc_at(lane.to_rational(q.media).to_micros())))
}

fn end_lane_output(host: &mut dyn Host, lane: &mut LaneState) {
    lane.done = true;
    if !lane.output_eos_sent {
        host.set_output_eos(lane.id);
        lane.output_eos_sent = true;
    }
}

/// Fix where a lane starts in the active range and how its timestamps move.
fn activate_lane(lane: &mut LaneState, origin: Rational, offset: Rational, cfg: &ReframerConfig) {
    let exact = cfg.xround == XRound::Seek || cfg.nosap;
    let t = lane.to_ticks(origin);

    match lane.start {
        StartState::StartAt(_) | StartState::EndOfStreamBeforeStart => {}
        _ if lane.fifo.is_empty() && lane.is_single_packet() => {
            if let Some(mut packet) = lane.held.clone() {
                let cts = (t - lane.info.delay).max(0) as u64;
                packet.cts = cts;
                packet.dts = cts;
                let media = lane.media_of(&packet);
                lane.fifo.push_front(Queued {
                    packet,
                    media,
                    frame: lane.frames_seen,
                    utc_ms: None,
                });
                lane.start = StartState::HeldSinglePacketReinjected;
                tracing::debug!("Lane {} replays its only packet at {t}", lane.id);
            }
        }
        _ if lane.fifo.is_empty() && lane.eos => {
            lane.start = StartState::EndOfStreamBeforeStart;
        }
        _ => lane.start = StartState::StartAt(t),
    }

    lane.window_start = match lane.start {
        StartState::StartAt(m) if lane.strategy.constrained && !exact => m,
        _ => t,
    };
    lane.shift = if cfg.xots {
        0
    } else {
        t - lane.info.delay - lane.to_ticks(offset)
    };
}

/// Rewrite one queued packet and hand it to the host.
fn emit(
    lane: &mut LaneState,
    entry: Queued,
    cut: Cut,
    decode_only: bool,
    ctx: &EmitContext,
    host: &mut dyn Host,
) -> Result<Emitted> {
    let sync = lane.is_sync(&entry);
    let Queued {
        mut packet,
        media,
        frame,
        ..
    } = entry;
    let end = media + cut.keep.unwrap_or(packet.duration as u64) as i64;
    packet.seek = decode_only;

    let out = rewrite::rewrite(&lane.info, lane.strategy.partial, packet, cut, lane.shift)?;
    let mut packet = out.packet;
    if let Some(rest) = out.remainder.filter(|_| lane.strategy.requeue_remainder) {
        let media = lane.media_of(&rest);
        lane.fifo.push_front(Queued {
            packet: rest,
            media,
            frame,
            utc_ms: None,
        });
    }

    if !lane.chunk_sent {
        packet.chunk = Some(ChunkInfo {
            index: ctx.chunk,
            suffix: ctx.label.clone(),
            frame_offset: ctx.frame_offset,
            file_boundary: ctx.file_boundary,
            props: ctx.props.clone(),
        });
        lane.chunk_sent = true;
    }
    if ctx.tcmdrw && lane.info.timecode {
        rewrite::advance_timecode(&mut packet, ctx.frame_offset)?;
    }

    if let Some(last) = lane.last_out {
        if packet.dts < last {
            tracing::debug!(
                "Lane {}: decode time {} before {last}; clamping",
                lane.id,
                packet.dts
            );
            packet.dts = last;
            packet.cts = packet.cts.max(last);
        }
    }
    lane.last_out = Some(packet.dts);

    lane.forwarded_in_range += 1;
    lane.last_forwarded_end = Some(end);
    if sync {
        lane.last_sync_forwarded = Some(media);
        lane.last_sync_emitted = Some((frame, media));
    }

    let emitted = Emitted {
        end: lane.to_rational(end),
        bytes: packet.size() as u64,
        video_frame: !decode_only
            && lane.info.category == StreamCategory::Video
            && ctx.index_lane == Some(lane.id),
    };
    host.push_output(lane.id, packet);
    Ok(emitted)
}

/// Forward reference packets that start past the end but decode before it.
/// They stay queued for the next range.
fn forward_reference_overlap(
    lane: &mut LaneState,
    end: i64,
    ctx: &EmitContext,
    host: &mut dyn Host,
) -> Result<()> {
    let delay = lane.info.delay;
    let overlap: Vec<Queued> = lane
        .fifo
        .iter()
        .take_while(|q| !q.packet.droppable && q.packet.dts as i64 + delay < end)
        .cloned()
        .collect();

    for entry in overlap {
        tracing::debug!("Lane {}: forwarding reference at {} past the end", lane.id, entry.media);
        let (last_end, last_sync) = (lane.last_forwarded_end, lane.last_sync_emitted);
        emit(lane, entry, Cut::default(), false, ctx, host)?;
        lane.last_forwarded_end = last_end;
        lane.last_sync_emitted = last_sync;
    }
    Ok(())
}

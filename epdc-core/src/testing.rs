//! Simulated controller for host-side tests
//!
//! One [`MockPanel`] holds the whole simulated board; cheap handles borrow
//! it and implement the collaborator traits, so a test can keep poking the
//! hardware while an engine owns the handles.

use core::cell::RefCell;

use heapless::Vec;

use crate::geometry::Rect;
use crate::pipeline::{HistogramStats, PipelineJob};
use crate::regs;
use crate::traits::{
    ImagePipeline, PipelineError, PowerRails, Rail, RailError, RegisterBus, SensorError,
    TemperatureSensor,
};

const MAX_RECORDS: usize = 64;
const REG_WORDS: usize = 0x500 / 4;
const RAILS: usize = 6;

/// An update the simulated controller was told to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Programmed {
    pub unit: usize,
    pub waveform: u8,
    pub full: bool,
    /// Fixed next-pixel value for fill updates
    pub fixed: Option<u8>,
    /// Region in panel coordinates
    pub region: Rect,
    pub addr: u32,
    pub temp_index: u32,
}

/// Rail operation recorded by the mock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RailOp {
    Enable,
    Disable,
}

struct PanelState {
    regs: [u32; REG_WORDS],
    irq: u32,
    luts_busy: u16,
    wb_busy: bool,
    collision: u16,
    programmed: Vec<Programmed, MAX_RECORDS>,

    rails: [bool; RAILS],
    rail_failure: Option<(Rail, Option<u32>)>,
    stuck_rail: Option<Rail>,
    rail_calls: Vec<(RailOp, Rail), MAX_RECORDS>,

    temperature: Result<i32, SensorError>,

    histogram: u32,
    pipeline_timeout: bool,
    pipeline_reject: bool,
    job_outstanding: bool,
    jobs: Vec<PipelineJob, MAX_RECORDS>,
    pipeline_resets: u32,
}

fn rail_index(rail: Rail) -> usize {
    match rail {
        Rail::Display => 0,
        Rail::V3p3 => 1,
        Rail::Clocks => 2,
        Rail::EpdDriver => 3,
        Rail::Vcom => 4,
        Rail::SystemSupply => 5,
    }
}

/// Simulated controller, rails, sensor and co-processor
pub struct MockPanel {
    state: RefCell<PanelState>,
}

impl Default for MockPanel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPanel {
    pub fn new() -> Self {
        let mut rails = [false; RAILS];
        rails[rail_index(Rail::SystemSupply)] = true;
        Self {
            state: RefCell::new(PanelState {
                regs: [0; REG_WORDS],
                irq: 0,
                luts_busy: 0,
                wb_busy: false,
                collision: 0,
                programmed: Vec::new(),
                rails,
                rail_failure: None,
                stuck_rail: None,
                rail_calls: Vec::new(),
                temperature: Ok(25),
                histogram: 0,
                pipeline_timeout: false,
                pipeline_reject: false,
                job_outstanding: false,
                jobs: Vec::new(),
                pipeline_resets: 0,
            }),
        }
    }

    pub fn registers(&self) -> MockRegisters<'_> {
        MockRegisters(self)
    }

    pub fn rails(&self) -> MockRails<'_> {
        MockRails(self)
    }

    pub fn sensor(&self) -> MockSensor<'_> {
        MockSensor(self)
    }

    pub fn pipeline(&self) -> MockPipeline<'_> {
        MockPipeline(self)
    }

    // Controller side

    /// Every update programmed so far
    pub fn programmed(&self) -> Vec<Programmed, MAX_RECORDS> {
        self.state.borrow().programmed.clone()
    }

    pub fn last_programmed(&self) -> Option<Programmed> {
        self.state.borrow().programmed.last().copied()
    }

    pub fn programmed_count(&self) -> usize {
        self.state.borrow().programmed.len()
    }

    pub fn busy_units(&self) -> u16 {
        self.state.borrow().luts_busy
    }

    pub fn working_buffer_busy(&self) -> bool {
        self.state.borrow().wb_busy
    }

    /// Raw value last written to a register
    pub fn register(&self, offset: u32) -> u32 {
        self.state.borrow().regs[(offset / 4) as usize]
    }

    /// Working buffer pass finished without collision
    pub fn complete_working_buffer(&self) {
        let mut s = self.state.borrow_mut();
        s.wb_busy = false;
        s.collision = 0;
        s.irq |= regs::IRQ_WB_CMPLT;
    }

    /// Working buffer pass finished, colliding with `units`
    pub fn complete_working_buffer_colliding(&self, units: u16) {
        let mut s = self.state.borrow_mut();
        s.wb_busy = false;
        s.collision = units;
        s.irq |= regs::IRQ_WB_CMPLT | regs::IRQ_LUT_COL;
    }

    /// Execution unit finished driving its update
    pub fn complete_unit(&self, unit: usize) {
        let mut s = self.state.borrow_mut();
        s.luts_busy &= !(1 << unit);
        s.irq |= 1 << unit;
    }

    /// Unit goes idle without raising its interrupt
    pub fn lose_unit_interrupt(&self, unit: usize) {
        self.state.borrow_mut().luts_busy &= !(1 << unit);
    }

    pub fn frame_end(&self) {
        self.state.borrow_mut().irq |= regs::IRQ_FRAME_END;
    }

    pub fn underrun(&self) {
        self.state.borrow_mut().irq |= regs::IRQ_TCE_UNDERRUN;
    }

    /// Latched interrupt status
    pub fn irq_status(&self) -> u32 {
        self.state.borrow().irq
    }

    // Rails side

    /// Make enabling `rail` fail, `times` times or forever
    pub fn fail_rail(&self, rail: Rail, times: Option<u32>) {
        self.state.borrow_mut().rail_failure = Some((rail, times));
    }

    pub fn clear_rail_failure(&self) {
        let mut s = self.state.borrow_mut();
        s.rail_failure = None;
        s.stuck_rail = None;
    }

    /// Make disabling `rail` fail, leaving it on
    pub fn stick_rail(&self, rail: Rail) {
        self.state.borrow_mut().stuck_rail = Some(rail);
    }

    pub fn rail_enabled(&self, rail: Rail) -> bool {
        self.state.borrow().rails[rail_index(rail)]
    }

    /// Rail turns off on its own, like a PMIC thermal shutdown
    pub fn drop_rail(&self, rail: Rail) {
        self.state.borrow_mut().rails[rail_index(rail)] = false;
    }

    pub fn rail_calls(&self) -> Vec<(RailOp, Rail), MAX_RECORDS> {
        self.state.borrow().rail_calls.clone()
    }

    pub fn clear_rail_calls(&self) {
        self.state.borrow_mut().rail_calls.clear();
    }

    // Sensor side

    pub fn set_temperature(&self, temp_c: i32) {
        self.state.borrow_mut().temperature = Ok(temp_c);
    }

    pub fn fail_sensor(&self) {
        self.state.borrow_mut().temperature = Err(SensorError::Bus);
    }

    // Co-processor side

    /// Histogram returned by the next jobs
    pub fn set_histogram(&self, bits: u32) {
        self.state.borrow_mut().histogram = bits;
    }

    pub fn set_pipeline_timeout(&self, timeout: bool) {
        self.state.borrow_mut().pipeline_timeout = timeout;
    }

    pub fn set_pipeline_reject(&self, reject: bool) {
        self.state.borrow_mut().pipeline_reject = reject;
    }

    pub fn jobs(&self) -> Vec<PipelineJob, MAX_RECORDS> {
        self.state.borrow().jobs.clone()
    }

    pub fn job_count(&self) -> usize {
        self.state.borrow().jobs.len()
    }

    pub fn pipeline_resets(&self) -> u32 {
        self.state.borrow().pipeline_resets
    }
}

/// Register handle
#[derive(Clone, Copy)]
pub struct MockRegisters<'a>(&'a MockPanel);

impl RegisterBus for MockRegisters<'_> {
    fn write(&mut self, offset: u32, value: u32) {
        let mut s = self.0.state.borrow_mut();
        match offset {
            regs::IRQ_CLEAR => s.irq &= !value,
            regs::UPD_CTRL => {
                let unit = regs::ctrl_unit(value);
                let cord = s.regs[(regs::UPD_CORD / 4) as usize];
                let size = s.regs[(regs::UPD_SIZE / 4) as usize];
                let fixed = s.regs[(regs::UPD_FIXED / 4) as usize];
                let record = Programmed {
                    unit,
                    waveform: regs::ctrl_waveform(value),
                    full: value & regs::UPD_CTRL_UPDATE_FULL != 0,
                    fixed: (value & regs::UPD_CTRL_USE_FIXED != 0)
                        .then_some(((fixed >> regs::UPD_FIXED_FIXNP_SHIFT) & 0xFF) as u8),
                    region: Rect::new(cord & 0xFFFF, cord >> 16, size & 0xFFFF, size >> 16),
                    addr: s.regs[(regs::UPD_ADDR / 4) as usize],
                    temp_index: s.regs[(regs::TEMP / 4) as usize],
                };
                s.luts_busy |= 1 << unit;
                s.wb_busy = true;
                let _ = s.programmed.push(record);
                s.regs[(offset / 4) as usize] = value;
            }
            _ => s.regs[(offset / 4) as usize] = value,
        }
    }

    fn read(&mut self, offset: u32) -> u32 {
        let s = self.0.state.borrow();
        match offset {
            regs::IRQ => s.irq,
            regs::STATUS_LUTS => s.luts_busy as u32,
            regs::STATUS_COL => s.collision as u32,
            regs::STATUS => {
                if s.wb_busy {
                    regs::STATUS_WB_BUSY
                } else {
                    0
                }
            }
            _ => s.regs[(offset / 4) as usize],
        }
    }
}

/// Rail handle
#[derive(Clone, Copy)]
pub struct MockRails<'a>(&'a MockPanel);

impl PowerRails for MockRails<'_> {
    fn enable(&mut self, rail: Rail) -> Result<(), RailError> {
        let mut s = self.0.state.borrow_mut();
        let _ = s.rail_calls.push((RailOp::Enable, rail));
        if let Some((failing, times)) = s.rail_failure {
            if failing == rail {
                match times {
                    Some(0) => s.rail_failure = None,
                    Some(n) => {
                        s.rail_failure = if n > 1 { Some((rail, Some(n - 1))) } else { None };
                        return Err(RailError::Fault);
                    }
                    None => return Err(RailError::Fault),
                }
            }
        }
        s.rails[rail_index(rail)] = true;
        Ok(())
    }

    fn disable(&mut self, rail: Rail) -> Result<(), RailError> {
        let mut s = self.0.state.borrow_mut();
        let _ = s.rail_calls.push((RailOp::Disable, rail));
        if s.stuck_rail == Some(rail) {
            return Err(RailError::Fault);
        }
        s.rails[rail_index(rail)] = false;
        Ok(())
    }

    fn is_enabled(&mut self, rail: Rail) -> bool {
        self.0.state.borrow().rails[rail_index(rail)]
    }
}

/// Temperature sensor handle
#[derive(Clone, Copy)]
pub struct MockSensor<'a>(&'a MockPanel);

impl TemperatureSensor for MockSensor<'_> {
    fn read_celsius(&mut self) -> Result<i32, SensorError> {
        self.0.state.borrow().temperature
    }
}

/// Co-processor handle
///
/// Jobs complete instantly unless a timeout or rejection is scripted.
#[derive(Clone, Copy)]
pub struct MockPipeline<'a>(&'a MockPanel);

impl ImagePipeline for MockPipeline<'_> {
    fn submit(&mut self, job: &PipelineJob) -> Result<(), PipelineError> {
        let mut s = self.0.state.borrow_mut();
        if s.job_outstanding {
            return Err(PipelineError::Busy);
        }
        if s.pipeline_reject {
            return Err(PipelineError::Rejected);
        }
        let _ = s.jobs.push(*job);
        s.job_outstanding = true;
        Ok(())
    }

    fn wait(&mut self, _timeout_ms: u32) -> Result<HistogramStats, PipelineError> {
        let mut s = self.0.state.borrow_mut();
        if s.pipeline_timeout {
            return Err(PipelineError::Timeout);
        }
        s.job_outstanding = false;
        Ok(HistogramStats::new(s.histogram))
    }

    fn reset(&mut self) {
        let mut s = self.0.state.borrow_mut();
        s.job_outstanding = false;
        s.pipeline_resets += 1;
    }
}

//! NI-DAQmx analog input task.
//!
//! One task with one voltage channel read through a custom linear scale, on a
//! continuous sample clock. Status codes are translated with `DAQmxGetErrorString`.
#![allow(unsafe_code)]

use std::ffi::{c_char, CStr, CString};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{LinearScale, SampleMode, SamplerConfig, TerminalConfig};
use crate::error::{AppResult, DaqError, Subsystem};
use crate::hardware::capabilities::SamplerSession;
use crate::hardware::status::{check, check_config};
use crate::measurement::VoltageSample;

#[allow(non_camel_case_types, non_snake_case, dead_code)]
mod sys {
    use std::ffi::{c_char, c_void};

    pub type int32 = i32;
    pub type uInt32 = u32;
    pub type uInt64 = u64;
    pub type bool32 = u32;
    pub type float64 = f64;
    pub type TaskHandle = *mut c_void;

    pub const DAQmx_Val_Volts: int32 = 10348;
    pub const DAQmx_Val_RSE: int32 = 10083;
    pub const DAQmx_Val_NRSE: int32 = 10078;
    pub const DAQmx_Val_Diff: int32 = 10106;
    pub const DAQmx_Val_FromCustomScale: int32 = 10065;
    pub const DAQmx_Val_Rising: int32 = 10280;
    pub const DAQmx_Val_ContSamps: int32 = 10123;
    pub const DAQmx_Val_FiniteSamps: int32 = 10178;

    /// Read timed out before the requested samples were acquired.
    pub const DAQmxErrorSamplesNotYetAvailable: int32 = -200284;

    #[link(name = "nidaqmx")]
    extern "C" {
        pub fn DAQmxCreateTask(taskName: *const c_char, taskHandle: *mut TaskHandle) -> int32;
        pub fn DAQmxStartTask(taskHandle: TaskHandle) -> int32;
        pub fn DAQmxStopTask(taskHandle: TaskHandle) -> int32;
        pub fn DAQmxClearTask(taskHandle: TaskHandle) -> int32;
        pub fn DAQmxCreateLinScale(
            name: *const c_char,
            slope: float64,
            yIntercept: float64,
            preScaledUnits: int32,
            scaledUnits: *const c_char,
        ) -> int32;
        pub fn DAQmxCreateAIVoltageChan(
            taskHandle: TaskHandle,
            physicalChannel: *const c_char,
            nameToAssignToChannel: *const c_char,
            terminalConfig: int32,
            minVal: float64,
            maxVal: float64,
            units: int32,
            customScaleName: *const c_char,
        ) -> int32;
        pub fn DAQmxCfgSampClkTiming(
            taskHandle: TaskHandle,
            source: *const c_char,
            rate: float64,
            activeEdge: int32,
            sampleMode: int32,
            sampsPerChan: uInt64,
        ) -> int32;
        pub fn DAQmxReadAnalogScalarF64(
            taskHandle: TaskHandle,
            timeout: float64,
            value: *mut float64,
            reserved: *mut bool32,
        ) -> int32;
        pub fn DAQmxGetErrorString(
            errorCode: int32,
            errorString: *mut c_char,
            bufferSize: uInt32,
        ) -> int32;
    }
}

fn describe_error(code: i64) -> String {
    let Ok(code32) = sys::int32::try_from(code) else {
        return format!("DAQmx error {code}");
    };
    let mut buffer = vec![0 as c_char; 1024];
    // SAFETY: the buffer is writable for its full length, which is passed along.
    let rc = unsafe { sys::DAQmxGetErrorString(code32, buffer.as_mut_ptr(), buffer.len() as u32) };
    if rc != 0 {
        return format!("DAQmx error {code}");
    }
    // SAFETY: DAQmx NUL-terminates within the buffer size it was given.
    unsafe { CStr::from_ptr(buffer.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

fn status(code: sys::int32) -> AppResult<()> {
    check(Subsystem::Sampler, i64::from(code), describe_error)
}

fn setup(code: sys::int32, what: &str) -> AppResult<()> {
    check_config(Subsystem::Sampler, i64::from(code), what, describe_error)
}

fn c_string(what: &str, value: &str) -> AppResult<CString> {
    CString::new(value)
        .map_err(|_| DaqError::HardwareConfig(format!("{what} contains a NUL byte: {value:?}")))
}

fn terminal_code(terminal: TerminalConfig) -> sys::int32 {
    match terminal {
        TerminalConfig::Rse => sys::DAQmx_Val_RSE,
        TerminalConfig::Nrse => sys::DAQmx_Val_NRSE,
        TerminalConfig::Differential => sys::DAQmx_Val_Diff,
    }
}

fn sample_mode_code(mode: SampleMode) -> sys::int32 {
    match mode {
        SampleMode::Continuous => sys::DAQmx_Val_ContSamps,
        SampleMode::Finite => sys::DAQmx_Val_FiniteSamps,
    }
}

/// An analog input task. Cleared on close or drop.
pub struct DaqmxTask {
    handle: Option<sys::TaskHandle>,
    name: String,
}

impl DaqmxTask {
    /// Create an empty task.
    pub fn open(task_name: &str) -> AppResult<Self> {
        let name_c = c_string("task name", task_name)?;
        let mut handle: sys::TaskHandle = std::ptr::null_mut();
        // SAFETY: `name_c` outlives the call and `handle` is a valid out-pointer.
        let code = unsafe { sys::DAQmxCreateTask(name_c.as_ptr(), &mut handle) };
        if code != 0 {
            return Err(DaqError::HardwareConnect(format!(
                "cannot create task '{task_name}': {}",
                describe_error(i64::from(code))
            )));
        }
        info!(task = task_name, "DAQmx task created");
        Ok(Self {
            handle: Some(handle),
            name: task_name.to_string(),
        })
    }

    /// Create, configure and start a task from settings.
    pub fn from_config(config: &SamplerConfig) -> AppResult<Self> {
        let mut task = Self::open(&config.task_name)?;
        create_linear_scale(&config.scale)?;
        task.add_voltage_channel(config)?;
        task.configure_clock(config.sample_rate, config.sample_mode, config.samples_per_channel)?;
        task.start()?;
        Ok(task)
    }

    fn handle(&self) -> AppResult<sys::TaskHandle> {
        self.handle.ok_or_else(|| DaqError::HardwareProtocol {
            subsystem: Subsystem::Sampler,
            code: -1,
            message: format!("task '{}' is cleared", self.name),
        })
    }

    /// Add the configured voltage channel, read through the configured custom scale.
    pub fn add_voltage_channel(&mut self, config: &SamplerConfig) -> AppResult<()> {
        let handle = self.handle()?;
        let physical = c_string("physical channel", &config.physical_channel)?;
        let name = c_string("channel name", &config.channel_name)?;
        let scale = c_string("scale name", &config.scale.name)?;
        // SAFETY: all strings outlive the call; the task handle is live.
        let code = unsafe {
            sys::DAQmxCreateAIVoltageChan(
                handle,
                physical.as_ptr(),
                name.as_ptr(),
                terminal_code(config.terminal),
                config.min_voltage,
                config.max_voltage,
                sys::DAQmx_Val_FromCustomScale,
                scale.as_ptr(),
            )
        };
        setup(code, "analog input channel")?;
        info!(
            channel = %config.physical_channel,
            min = config.min_voltage,
            max = config.max_voltage,
            "Voltage channel added"
        );
        Ok(())
    }

    /// Configure the onboard sample clock on the rising edge.
    pub fn configure_clock(
        &mut self,
        rate: f64,
        mode: SampleMode,
        samples_per_channel: u64,
    ) -> AppResult<()> {
        let handle = self.handle()?;
        // SAFETY: a null source selects the onboard clock; the task handle is live.
        let code = unsafe {
            sys::DAQmxCfgSampClkTiming(
                handle,
                std::ptr::null(),
                rate,
                sys::DAQmx_Val_Rising,
                sample_mode_code(mode),
                samples_per_channel,
            )
        };
        setup(code, "sample clock")
    }

    /// Start the task so scalar reads return samples.
    pub fn start(&mut self) -> AppResult<()> {
        let handle = self.handle()?;
        // SAFETY: the task handle is live.
        setup(unsafe { sys::DAQmxStartTask(handle) }, "task start")?;
        info!(task = %self.name, "DAQmx task started");
        Ok(())
    }
}

/// Register a named linear scale with the driver.
pub fn create_linear_scale(scale: &LinearScale) -> AppResult<()> {
    let name = c_string("scale name", &scale.name)?;
    let units = c_string("scale units", &scale.units)?;
    // SAFETY: both strings outlive the call.
    let code = unsafe {
        sys::DAQmxCreateLinScale(
            name.as_ptr(),
            scale.slope,
            scale.intercept,
            sys::DAQmx_Val_Volts,
            units.as_ptr(),
        )
    };
    setup(code, "linear scale")
}

impl SamplerSession for DaqmxTask {
    fn read_next(&mut self, timeout: Duration) -> AppResult<VoltageSample> {
        let handle = self.handle()?;
        let mut value: f64 = 0.0;
        // SAFETY: `value` is a valid out-pointer; the reserved argument must be null.
        let code = unsafe {
            sys::DAQmxReadAnalogScalarF64(
                handle,
                timeout.as_secs_f64(),
                &mut value,
                std::ptr::null_mut(),
            )
        };
        if code == sys::DAQmxErrorSamplesNotYetAvailable {
            return Err(DaqError::HardwareTimeout {
                subsystem: Subsystem::Sampler,
                operation: "analog sample",
                timeout,
            });
        }
        status(code)?;
        Ok(VoltageSample(value))
    }

    fn close(&mut self) -> AppResult<()> {
        let handle = self.handle()?;
        self.handle = None;
        // SAFETY: the handle is live and cleared exactly once below.
        let stopped = status(unsafe { sys::DAQmxStopTask(handle) });
        // SAFETY: as above.
        let cleared = status(unsafe { sys::DAQmxClearTask(handle) });
        info!(task = %self.name, "DAQmx task cleared");
        stopped.and(cleared)
    }
}

impl Drop for DaqmxTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            warn!(task = %self.name, "DAQmx task dropped while running; clearing");
            // SAFETY: the handle is live; nothing else can use it after this.
            unsafe {
                sys::DAQmxStopTask(handle);
                sys::DAQmxClearTask(handle);
            }
        }
    }
}

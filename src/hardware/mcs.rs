//! MCS positioning controller session.
//!
//! Talks to the vendor's `MCSControl` C library in asynchronous mode. Every call returns
//! an `SA_STATUS`; nonzero codes are translated with `SA_GetStatusInfo`.
#![allow(unsafe_code)]

use std::ffi::{c_char, c_int, c_uint, CStr, CString};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::MotionProfile;
use crate::error::{AppResult, DaqError, Subsystem};
use crate::hardware::capabilities::ActuatorSession;
use crate::hardware::status::{check, check_config};
use crate::measurement::{ChannelId, Packet, PacketKind};

#[allow(non_camel_case_types, non_snake_case, dead_code)]
mod sys {
    use std::ffi::{c_char, c_int, c_uint};

    pub type SA_STATUS = c_uint;
    pub type SA_INDEX = c_uint;
    pub type SA_PACKET_TYPE = c_uint;

    #[repr(C)]
    #[derive(Debug, Default, Clone, Copy)]
    pub struct SA_PACKET {
        pub packetType: SA_PACKET_TYPE,
        pub channelIndex: SA_INDEX,
        pub data1: c_uint,
        pub data2: c_int,
        pub data3: c_int,
        pub data4: c_uint,
    }

    pub const SA_OK: SA_STATUS = 0;

    pub const SA_NO_PACKET_TYPE: SA_PACKET_TYPE = 0;
    pub const SA_ERROR_PACKET_TYPE: SA_PACKET_TYPE = 1;
    pub const SA_POSITION_PACKET_TYPE: SA_PACKET_TYPE = 2;

    pub const SA_SENSOR_ENABLED: c_uint = 1;
    pub const SA_UNBUFFERED_OUTPUT: c_uint = 0;
    pub const SA_BUFFERED_OUTPUT: c_uint = 1;
    pub const SA_DISABLED: c_int = 0;
    pub const SA_ENABLED: c_int = 1;

    pub const SA_GENERAL: c_uint = 0x0001;
    pub const SA_LOW_VIBRATION: c_uint = 0x0011;
    pub const SA_OPERATION_MODE: c_uint = 0x0003;

    /// Equivalent of the `SA_EPK` header macro.
    pub const fn sa_epk(selector: c_uint, subselector: c_uint, property: c_uint) -> c_uint {
        (selector << 16) + (subselector << 8) + property
    }

    #[link(name = "MCSControl")]
    extern "C" {
        pub fn SA_OpenSystem(
            systemIndex: *mut SA_INDEX,
            locator: *const c_char,
            options: *const c_char,
        ) -> SA_STATUS;
        pub fn SA_CloseSystem(systemIndex: SA_INDEX) -> SA_STATUS;
        pub fn SA_GetNumberOfChannels(systemIndex: SA_INDEX, channels: *mut c_uint) -> SA_STATUS;
        pub fn SA_GetStatusInfo(status: SA_STATUS, info: *mut *const c_char) -> SA_STATUS;

        pub fn SA_SetSensorEnabled_A(systemIndex: SA_INDEX, enabled: c_uint) -> SA_STATUS;
        pub fn SA_SetBufferedOutput_A(systemIndex: SA_INDEX, mode: c_uint) -> SA_STATUS;
        pub fn SA_FlushOutput_A(systemIndex: SA_INDEX) -> SA_STATUS;
        pub fn SA_Stop_A(systemIndex: SA_INDEX, channelIndex: SA_INDEX) -> SA_STATUS;
        pub fn SA_SetClosedLoopMoveSpeed_A(
            systemIndex: SA_INDEX,
            channelIndex: SA_INDEX,
            speed: c_uint,
        ) -> SA_STATUS;
        pub fn SA_SetClosedLoopMoveAcceleration_A(
            systemIndex: SA_INDEX,
            channelIndex: SA_INDEX,
            acceleration: c_uint,
        ) -> SA_STATUS;
        pub fn SA_SetChannelProperty_A(
            systemIndex: SA_INDEX,
            channelIndex: SA_INDEX,
            key: c_uint,
            value: c_int,
        ) -> SA_STATUS;
        pub fn SA_GotoPositionAbsolute_A(
            systemIndex: SA_INDEX,
            channelIndex: SA_INDEX,
            position: c_int,
            holdTime: c_uint,
        ) -> SA_STATUS;
        pub fn SA_GetPosition_A(systemIndex: SA_INDEX, channelIndex: SA_INDEX) -> SA_STATUS;
        pub fn SA_ReceiveNextPacket_A(
            systemIndex: SA_INDEX,
            timeout: c_uint,
            packet: *mut SA_PACKET,
        ) -> SA_STATUS;
    }
}

/// Translate a status code with the library's own description.
fn describe_status(code: i64) -> String {
    let Ok(status) = sys::SA_STATUS::try_from(code) else {
        return format!("MCS error {code}");
    };
    let mut info: *const c_char = std::ptr::null();
    // SAFETY: `info` is a valid out-pointer; on success the library points it at a
    // static, NUL-terminated string.
    let found = unsafe { sys::SA_GetStatusInfo(status, &mut info) } == sys::SA_OK;
    if found && !info.is_null() {
        // SAFETY: checked non-null above, string is owned by the library.
        let text = unsafe { CStr::from_ptr(info) }.to_string_lossy();
        format!("MCS error {code}: {text}")
    } else {
        format!("MCS error {code}")
    }
}

fn status(code: sys::SA_STATUS) -> AppResult<()> {
    check(Subsystem::Actuator, i64::from(code), describe_status)
}

fn c_string(what: &str, value: &str) -> AppResult<CString> {
    CString::new(value)
        .map_err(|_| DaqError::HardwareConnect(format!("{what} contains a NUL byte: {value:?}")))
}

/// Open session with an MCS controller.
pub struct McsSystem {
    index: Option<sys::SA_INDEX>,
    channels: u32,
}

impl McsSystem {
    /// Open the controller at `locator` (e.g. `usb:ix:0`) with `options` (e.g. `async`)
    /// and enumerate its channels.
    pub fn open(locator: &str, options: &str) -> AppResult<Self> {
        let locator_c = c_string("locator", locator)?;
        let options_c = c_string("options", options)?;

        let mut index: sys::SA_INDEX = 0;
        // SAFETY: both strings outlive the call and `index` is a valid out-pointer.
        let code =
            unsafe { sys::SA_OpenSystem(&mut index, locator_c.as_ptr(), options_c.as_ptr()) };
        if code != sys::SA_OK {
            return Err(DaqError::HardwareConnect(format!(
                "cannot open '{locator}': {}",
                describe_status(i64::from(code))
            )));
        }
        let mut system = Self {
            index: Some(index),
            channels: 0,
        };

        let mut channels: c_uint = 0;
        // SAFETY: `channels` is a valid out-pointer.
        let code = unsafe { sys::SA_GetNumberOfChannels(index, &mut channels) };
        if code != sys::SA_OK {
            return Err(DaqError::HardwareConnect(format!(
                "cannot enumerate channels on '{locator}': {}",
                describe_status(i64::from(code))
            )));
        }
        system.channels = channels;
        info!(locator, channels, "MCS system opened");
        Ok(system)
    }

    fn index(&self) -> AppResult<sys::SA_INDEX> {
        self.index.ok_or_else(|| DaqError::HardwareProtocol {
            subsystem: Subsystem::Actuator,
            code: -1,
            message: "MCS system is closed".to_string(),
        })
    }
}

impl ActuatorSession for McsSystem {
    fn channel_count(&self) -> u32 {
        self.channels
    }

    fn enable_sensors(&mut self) -> AppResult<()> {
        let index = self.index()?;
        // SAFETY: plain value arguments on an open system.
        status(unsafe { sys::SA_SetSensorEnabled_A(index, sys::SA_SENSOR_ENABLED) })
    }

    fn configure(&mut self, channel: ChannelId, profile: &MotionProfile) -> AppResult<()> {
        let index = self.index()?;
        let describe = describe_status;

        // SAFETY: plain value arguments on an open system.
        let code = unsafe { sys::SA_SetClosedLoopMoveSpeed_A(index, channel.0, profile.speed) };
        check_config(Subsystem::Actuator, i64::from(code), "closed-loop speed", describe)?;

        // SAFETY: as above.
        let code = unsafe {
            sys::SA_SetClosedLoopMoveAcceleration_A(index, channel.0, profile.acceleration)
        };
        check_config(Subsystem::Actuator, i64::from(code), "closed-loop acceleration", describe)?;

        let key = sys::sa_epk(sys::SA_GENERAL, sys::SA_LOW_VIBRATION, sys::SA_OPERATION_MODE);
        let value = if profile.low_vibration {
            sys::SA_ENABLED
        } else {
            sys::SA_DISABLED
        };
        // SAFETY: as above.
        let code = unsafe { sys::SA_SetChannelProperty_A(index, channel.0, key, value) };
        check_config(Subsystem::Actuator, i64::from(code), "low-vibration mode", describe)
    }

    fn set_buffered_output(&mut self, buffered: bool) -> AppResult<()> {
        let index = self.index()?;
        let mode = if buffered {
            sys::SA_BUFFERED_OUTPUT
        } else {
            sys::SA_UNBUFFERED_OUTPUT
        };
        // SAFETY: plain value arguments on an open system.
        status(unsafe { sys::SA_SetBufferedOutput_A(index, mode) })
    }

    fn move_absolute(&mut self, channel: ChannelId, target: i64, hold_time: u32) -> AppResult<()> {
        let index = self.index()?;
        let target = c_int::try_from(target).map_err(|_| {
            DaqError::HardwareConfig(format!("target {target} exceeds the controller's range"))
        })?;
        // SAFETY: plain value arguments on an open system.
        status(unsafe { sys::SA_GotoPositionAbsolute_A(index, channel.0, target, hold_time) })
    }

    fn stop(&mut self, channel: ChannelId) -> AppResult<()> {
        let index = self.index()?;
        // SAFETY: plain value arguments on an open system.
        status(unsafe { sys::SA_Stop_A(index, channel.0) })
    }

    fn query_position(&mut self, channel: ChannelId) -> AppResult<()> {
        let index = self.index()?;
        // SAFETY: plain value arguments on an open system.
        status(unsafe { sys::SA_GetPosition_A(index, channel.0) })
    }

    fn receive_packet(&mut self, timeout: Duration) -> AppResult<Packet> {
        let index = self.index()?;
        let timeout_ms = c_uint::try_from(timeout.as_millis()).unwrap_or(c_uint::MAX);
        let mut packet = sys::SA_PACKET::default();
        // SAFETY: `packet` is a valid, writable SA_PACKET.
        status(unsafe { sys::SA_ReceiveNextPacket_A(index, timeout_ms, &mut packet) })?;

        let channel = ChannelId(packet.channelIndex);
        Ok(match packet.packetType {
            sys::SA_NO_PACKET_TYPE => Packet {
                kind: PacketKind::None,
                channel,
                data: 0,
            },
            sys::SA_ERROR_PACKET_TYPE => Packet::error(channel, i64::from(packet.data1)),
            sys::SA_POSITION_PACKET_TYPE => Packet::position(channel, i64::from(packet.data2)),
            other => Packet {
                kind: PacketKind::Other(other),
                channel,
                data: i64::from(packet.data2),
            },
        })
    }

    fn flush_output(&mut self) -> AppResult<()> {
        let index = self.index()?;
        // SAFETY: plain value argument on an open system.
        status(unsafe { sys::SA_FlushOutput_A(index) })
    }

    fn close(&mut self) -> AppResult<()> {
        let index = self.index()?;
        self.index = None;
        // SAFETY: `index` came from SA_OpenSystem and is closed exactly once.
        status(unsafe { sys::SA_CloseSystem(index) })?;
        info!("MCS system closed");
        Ok(())
    }
}

impl Drop for McsSystem {
    fn drop(&mut self) {
        if let Some(index) = self.index.take() {
            warn!("MCS system dropped while open; closing");
            // SAFETY: `index` is still open; nothing else can use it after this.
            unsafe {
                sys::SA_CloseSystem(index);
            }
        }
    }
}

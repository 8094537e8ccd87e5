//wire payloads, little-endian packed

//MAVLink ids kept so a real autopilot bridge can map them 1:1
pub const MAV_TYPE_GCS: u8 = 6;
pub const MAV_AUTOPILOT_INVALID: u8 = 8;
pub const MAV_STATE_ACTIVE: u8 = 4;

pub const MAV_CMD_CONDITION_YAW: u16 = 115;
pub const MAV_CMD_CONDITION_CHANGE_ALT: u16 = 113;

/// Fixed-layout message that can be copied straight to and from the wire.
///
/// # Safety
/// Implementors must be `repr(C, packed)` plain data where every bit pattern
/// is a valid value.
pub unsafe trait WireMessage: Copy{
    const SIZE: usize = std::mem::size_of::<Self>();

    fn from_bytes(data: &[u8]) -> Option<Self>{
        if data.len() < Self::SIZE{
            return None;
        }
        unsafe{
            Some(std::ptr::read_unaligned(data.as_ptr() as *const Self))
        }
    }

    fn to_bytes(&self) -> Vec<u8>{
        let mut bytes = vec![0u8; Self::SIZE];
        unsafe{
            std::ptr::copy_nonoverlapping(
                self as *const Self as *const u8,
                bytes.as_mut_ptr(),
                Self::SIZE
            );
        }
        bytes
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default)]
pub struct HeartbeatMsg{
    pub custom_mode: u32,
    pub vehicle_type: u8,
    pub autopilot: u8,
    pub base_mode: u8,
    pub system_status: u8,
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default)]
pub struct AttitudeMsg{
    pub time_boot_ms: u32,
    pub roll: f32,        //rad
    pub pitch: f32,
    pub yaw: f32,
    pub rollspeed: f32,   //rad/s
    pub pitchspeed: f32,
    pub yawspeed: f32,
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalPositionMsg{
    pub time_boot_ms: u32,
    pub x: f32,           //m, local frame
    pub y: f32,
    pub z: f32,
    pub vx: f32,          //m/s
    pub vy: f32,
    pub vz: f32,
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default)]
pub struct CommandLongMsg{
    pub command: u16,
    pub confirmation: u8,
    pub params: [f32; 7],
}

unsafe impl WireMessage for HeartbeatMsg{}
unsafe impl WireMessage for AttitudeMsg{}
unsafe impl WireMessage for LocalPositionMsg{}
unsafe impl WireMessage for CommandLongMsg{}

//message sizes
pub const HEARTBEAT_MSG_SIZE: usize = 8;         //u32 + 4 * u8
pub const ATTITUDE_MSG_SIZE: usize = 28;         //u32 + 6 * f32
pub const LOCAL_POSITION_MSG_SIZE: usize = 28;   //u32 + 6 * f32
pub const COMMAND_LONG_MSG_SIZE: usize = 31;     //u16 + u8 + 7 * f32

impl HeartbeatMsg{
    pub fn ground_station() -> Self{
        HeartbeatMsg{
            custom_mode: 0,
            vehicle_type: MAV_TYPE_GCS,
            autopilot: MAV_AUTOPILOT_INVALID,
            base_mode: 0,
            system_status: MAV_STATE_ACTIVE,
        }
    }
}

impl CommandLongMsg{
    pub fn new(command: u16, params: [f32; 7]) -> Self{
        CommandLongMsg{ command, confirmation: 0, params }
    }
}

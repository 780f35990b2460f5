//! Protocol constants for the aXiom usage/page address space.
//!
//! Values follow the aXiom host interface and TNx protocol bridge
//! documentation.

// ============================================================================
// Page Addressing
// ============================================================================

/// Size of one physical page.
pub const PAGE_SIZE: usize = 256;

/// Read/write direction flag, bit 7 of the length MSB in the page header.
pub const AX_COMMS_READ: u8 = 0x80;

/// Page header length: `[addr_lsb, addr_msb, len_lsb, len_msb]`.
pub const AX_HEADER_LEN: usize = 4;

/// Largest length the 15-bit header length field can carry.
pub const MAX_TRANSFER_LEN: u16 = 0x7FFF;

// ============================================================================
// Well-known Usages
// ============================================================================

/// u02 System Manager.
pub const USAGE_SYSTEM_MANAGER: u8 = 0x02;

/// u06 Self Test configuration.
pub const USAGE_SELF_TEST: u8 = 0x06;

/// u31 Device Information (also holds the usage table).
pub const USAGE_DEVICE_INFO: u8 = 0x31;

/// u32 Device Capabilities.
pub const USAGE_DEVICE_CAPABILITIES: u8 = 0x32;

/// u33 CRC Data, read-only.
pub const USAGE_CRC_DATA: u8 = 0x33;

/// u34 Report usage, source of the bridge proxy stream.
pub const USAGE_REPORT: u8 = 0x34;

/// u93 AE Profile. Its CDU query reports length as `param1 * param2`.
pub const USAGE_AE_PROFILE: u8 = 0x93;

/// Length of u31 page 0 (device information block).
pub const U31_PAGE0_LEN: u16 = 12;

/// Size of one usage table record.
pub const USAGE_TABLE_ENTRY_SIZE: usize = 6;

/// Bootloader mode flag, bit 7 of byte 1 of u31 page 0.
pub const U31_BOOTLOADER_FLAG: u8 = 0x80;

// ============================================================================
// System Manager (u02)
// ============================================================================

/// Command field value meaning "idle / completed".
pub const SYSMGR_IDLE: u16 = 0x0000;

/// Command field value while a usage write is still being applied.
pub const SYSMGR_WRITE_IN_PROGRESS: u16 = 0x7FFF;

/// Magic sequence for ENTER_BOOTLOADER, one value per write.
pub const BOOTLOADER_ENTRY_MAGIC: [u16; 3] = [0x5555, 0xAAAA, 0xA55A];

/// Parameters for SAVE_CONFIG.
pub const SAVE_CONFIG_MAGIC: [u16; 3] = [0x0000, 0xB10C, 0xC0DE];

/// Parameters for FILL_CONFIG.
pub const FILL_CONFIG_MAGIC: [u16; 3] = [0x5555, 0xAAAA, 0xA55A];

// ============================================================================
// Command Driven Usages
// ============================================================================

pub const CDU_CMD_FETCH: u16 = 0x0001;
pub const CDU_CMD_STORE: u16 = 0x0002;
pub const CDU_CMD_COMMIT: u16 = 0x0003;
pub const CDU_CMD_QUERY: u16 = 0x0004;

/// Payload bytes moved per FETCH/STORE.
pub const CDU_XFER_SIZE: usize = 48;

/// Offset of the payload inside the command buffer.
pub const CDU_PAYLOAD_OFFSET: usize = 8;

/// Offset of the 16-bit transfer offset inside the command buffer.
pub const CDU_OFFSET_FIELD: usize = 4;

/// Status bit signalling a failed command.
pub const CDU_ERROR_MASK: u16 = 0x8000;

/// Bytes written at offsets 2..6 of a COMMIT command.
pub const CDU_COMMIT_MAGIC: [u8; 4] = [0x0C, 0xB1, 0xDE, 0xC0];

// ============================================================================
// Bootloader Protocol
// ============================================================================

pub const BLP_REG_COMMAND: u16 = 0x0100;
pub const BLP_REG_STATUS: u16 = 0x0100;
pub const BLP_FIFO_ADDRESS: u16 = 0x0102;

/// Length of a status register read.
pub const BLP_STATUS_LEN: u16 = 4;

/// Busy flag: bit 0 of status byte 2.
pub const BLP_BUSY_BYTE: usize = 2;
pub const BLP_BUSY_MASK: u8 = 0x01;

/// Written to the command register to reset the device.
pub const BLP_CMD_RESET: [u8; 2] = [0x02, 0x00];

// ============================================================================
// TNx Protocol Bridges (USB / TCP)
// ============================================================================

pub const ATMEL_VENDOR_ID: u16 = 0x03EB;
pub const ST_VENDOR_ID: u16 = 0x0483;
pub const GD_VENDOR_ID: u16 = 0x28E9;

/// Bridge vendor IDs in probing priority order.
pub const BRIDGE_VENDOR_IDS: &[u16] = &[ATMEL_VENDOR_ID, ST_VENDOR_ID, GD_VENDOR_ID];

/// Bridge running the touch bridge protocol (proxy capable).
pub const BRIDGE_TBP_PID: u16 = 0x6F02;

/// Bridge control interface number.
pub const AX_IF_TBPCTRL: u8 = 0;

/// Bytes of bridge framing in front of the page header.
pub const AX_TBP_I2C_DEV_HEAD_LEN: usize = 3;

/// Response header on USB reads: `[status, length]`.
pub const AX_RX_HEADER_LEN: usize = 2;

pub const AX_TBP_CMD_NULL: u8 = 0x86;
pub const AX_TBP_I2C_DEVICE1: u8 = 0x51;
pub const AX_TBP_REPEAT: u8 = 0x88;
pub const AX_TBP_USBID_UNSOLICITED: u8 = 0x9A;
pub const AX_CMD_RESET: u8 = 0xEF;

pub const AX_TBP_RDWR_OK: u8 = 0x00;
pub const AX_TBP_NOACK_DATA: u8 = 0x01;
pub const AX_TBP_NOACK_ADDR: u8 = 0x02;
pub const AX_TBP_WR_OK: u8 = 0x04;

/// Default TCP bridge port.
pub const TCP_BRIDGE_PORT: u16 = 3825;

/// Largest chunk the TCP bridge moves per request.
pub const TCP_MAX_PACKET_SIZE: usize = 255;

pub const TCP_CMD_EXIT: u8 = 0xFF;

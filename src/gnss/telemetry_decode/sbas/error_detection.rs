
use byteorder::{BigEndian, ByteOrder};

use crate::GnssError;
use crate::utils::bools_to_int;

pub const CRC_24Q_POLYNOMIAL:u32 = 0x1864CFB;

pub const MESSAGE_BITS:usize = 250;
const DATA_BITS:usize = 226;

pub fn crc24q(data:&[u8]) -> u32 {
	let mut crc:u32 = 0;
	for b in data {
		crc ^= (*b as u32) << 16;
		for _ in 0..8 {
			crc <<= 1;
			if crc & 0x1000000 != 0 { crc ^= CRC_24Q_POLYNOMIAL; }
		}
	}
	crc & 0xFFFFFF
}

/// CRC over the 226 message bits, zero padded at the front to 29 bytes
pub fn message_crc(bits:&[bool]) -> Result<u32, GnssError> {
	if bits.len() < DATA_BITS {
		return Err(GnssError::InvalidTelemetryData("SBAS message shorter than 226 bits"));
	}
	Ok(crc24q(&bools_to_int::to_byte_vec(&bits[..DATA_BITS], 29, true)?))
}

pub fn is_message_crc_ok(message_w_crc:&[bool]) -> bool {
	if message_w_crc.len() != MESSAGE_BITS { return false; }

	let parity = match bools_to_int::to_byte_vec(&message_w_crc[DATA_BITS..], 3, false) {
		Ok(bytes) => BigEndian::read_u24(&bytes),
		Err(_) => return false,
	};
	match message_crc(message_w_crc) {
		Ok(crc) => crc == parity,
		Err(_) => false,
	}
}

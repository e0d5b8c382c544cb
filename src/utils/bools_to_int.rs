
use crate::GnssError;

// Navigation words arrive MSB first, so every helper here reads bits[0] as the most significant bit

pub fn to_u64(bools:&[bool]) -> Result<u64, GnssError> {
	if bools.len() <= 64 {
		Ok(bools.iter().fold(0u64, |acc, b| (acc << 1) | (*b as u64)))
	} else {
		Err(GnssError::InvalidTelemetryData("x.len() > 64 in bools_to_int::to_u64"))
	}
}

pub fn to_u8(bools:&[bool]) -> Result<u8, GnssError> {
	if bools.len() <= 8 { Ok(to_u64(bools)? as u8) }
	else { Err(GnssError::InvalidTelemetryData("x.len() > 8 in bools_to_int::to_u8")) }
}

pub fn to_u16(bools:&[bool]) -> Result<u16, GnssError> {
	if bools.len() <= 16 { Ok(to_u64(bools)? as u16) }
	else { Err(GnssError::InvalidTelemetryData("x.len() > 16 in bools_to_int::to_u16")) }
}

pub fn to_u32(bools:&[bool]) -> Result<u32, GnssError> {
	if bools.len() <= 32 { Ok(to_u64(bools)? as u32) }
	else { Err(GnssError::InvalidTelemetryData("x.len() > 32 in bools_to_int::to_u32")) }
}

/// Two's complement, sign taken from bools[0]
pub fn to_i64(bools:&[bool]) -> Result<i64, GnssError> {
	let n = bools.len();
	if n == 0 || n > 63 {
		return Err(GnssError::InvalidTelemetryData("x.len() not in 1..=63 in bools_to_int::to_i64"));
	}
	let u = to_u64(bools)? as i64;
	if bools[0] { Ok(u - (1i64 << n)) } else { Ok(u) }
}

pub fn to_i32(bools:&[bool]) -> Result<i32, GnssError> {
	if bools.len() <= 32 { Ok(to_i64(bools)? as i32) }
	else { Err(GnssError::InvalidTelemetryData("x.len() > 32 in bools_to_int::to_i32")) }
}

/// Unsigned field split across two locations, first part most significant
pub fn to_u32_split(a:&[bool], b:&[bool]) -> Result<u32, GnssError> {
	to_u32(&[a, b].concat())
}

/// Signed field split across two locations, sign taken from the first part
pub fn to_i32_split(a:&[bool], b:&[bool]) -> Result<i32, GnssError> {
	to_i32(&[a, b].concat())
}

/// Packs bits into bytes. With `right_aligned` the unused leading bits of the first byte are zero,
/// otherwise the unused trailing bits of the last byte are zero.
pub fn to_byte_vec(x:&[bool], n_bytes:usize, right_aligned:bool) -> Result<Vec<u8>, GnssError> {
	if x.len() > 8*n_bytes {
		return Err(GnssError::InvalidTelemetryData("x.len() > 8*n_bytes in bools_to_int::to_byte_vec"));
	}
	let pad = 8*n_bytes - x.len();
	let mut padded:Vec<bool> = Vec::with_capacity(8*n_bytes);
	if right_aligned { padded.extend(std::iter::repeat(false).take(pad)); }
	padded.extend_from_slice(x);
	if !right_aligned { padded.extend(std::iter::repeat(false).take(pad)); }

	padded.chunks(8).map(to_u8).collect()
}


use serde::{Serialize, Deserialize};

pub const WGS84_SEMI_MAJOR_AXIS_METERS:f64 = 6378137.0;
pub const WGS84_FLATTENING:f64 = 1.0 / 298.257223563;
pub const C:f64 = 299792458.0;                       // [m/s] speed of light

const HEIGHT_TOLERANCE_M:f64 = 0.01;
const MAX_ITER:usize = 20;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct PositionWGS84 {
	pub latitude:f64,                  // [rad]
	pub longitude:f64,                 // [rad]
	pub height_above_ellipsoid:f64,    // [m]
}

fn e_sq() -> f64 { WGS84_FLATTENING * (2.0 - WGS84_FLATTENING) }

/// Iterates latitude and height until the height correction drops below a centimeter
pub fn ecef_to_wgs84(e1:f64, e2:f64, e3:f64) -> PositionWGS84 {
	let a:f64 = WGS84_SEMI_MAJOR_AXIS_METERS;
	let e_sq:f64 = e_sq();
	let p:f64 = (e1*e1 + e2*e2).sqrt();
	let longitude:f64 = e2.atan2(e1);

	if p < 1.0e-9 {
		// On the polar axis latitude is +/-90 and the iteration below degenerates
		let b = a * (1.0 - WGS84_FLATTENING);
		let latitude = if e3 >= 0.0 { std::f64::consts::FRAC_PI_2 } else { -std::f64::consts::FRAC_PI_2 };
		return PositionWGS84{ latitude, longitude, height_above_ellipsoid: e3.abs() - b };
	}

	let mut latitude:f64 = e3.atan2(p * (1.0 - e_sq));
	let mut height_above_ellipsoid:f64 = 0.0;
	for _ in 0..MAX_ITER {
		let n:f64 = a / (1.0 - e_sq*latitude.sin().powi(2)).sqrt();
		let h_next:f64 = p / latitude.cos() - n;
		latitude = e3.atan2(p * (1.0 - e_sq * n / (n + h_next)));
		let dh = (h_next - height_above_ellipsoid).abs();
		height_above_ellipsoid = h_next;
		if dh < HEIGHT_TOLERANCE_M { break; }
	}

	PositionWGS84{ latitude, longitude, height_above_ellipsoid }
}

pub fn wgs84_to_ecef(pos:&PositionWGS84) -> (f64, f64, f64) {
	let e_sq:f64 = e_sq();
	let (slat, clat) = pos.latitude.sin_cos();
	let (slon, clon) = pos.longitude.sin_cos();
	let n:f64 = WGS84_SEMI_MAJOR_AXIS_METERS / (1.0 - e_sq*slat*slat).sqrt();
	let h = pos.height_above_ellipsoid;
	((n + h)*clat*clon, (n + h)*clat*slon, (n*(1.0 - e_sq) + h)*slat)
}

/// Azimuth and elevation [rad] of `sv` seen from `obs`, both ECEF
pub fn az_el(obs:(f64, f64, f64), sv:(f64, f64, f64)) -> (f64, f64) {
	let d = (sv.0 - obs.0, sv.1 - obs.1, sv.2 - obs.2);
	let geo = ecef_to_wgs84(obs.0, obs.1, obs.2);
	let (sp, cp) = geo.latitude.sin_cos();
	let (sl, cl) = geo.longitude.sin_cos();

	// Local east, north, up
	let e:f64 = -sl*d.0 + cl*d.1;
	let n:f64 = -sp*cl*d.0 - sp*sl*d.1 + cp*d.2;
	let u:f64 =  cp*cl*d.0 + cp*sl*d.1 + sp*d.2;

	let horizontal:f64 = (e*e + n*n).sqrt();
	let mut az:f64 = e.atan2(n);
	if az < 0.0 { az += 2.0*std::f64::consts::PI; }
	(az, u.atan2(horizontal))
}

#[cfg(test)]
mod tests {

	use super::*;

	#[test]
	fn geodetic_round_trip_is_centimeter_accurate() {
		let truth = PositionWGS84{ latitude: 0.6, longitude: -1.45, height_above_ellipsoid: 350.0 };
		let (x, y, z) = wgs84_to_ecef(&truth);
		let est = ecef_to_wgs84(x, y, z);
		assert!((est.latitude - truth.latitude).abs() < 1.0e-9);
		assert!((est.longitude - truth.longitude).abs() < 1.0e-12);
		assert!((est.height_above_ellipsoid - truth.height_above_ellipsoid).abs() < 0.01);
	}

	#[test]
	fn zenith_satellite_has_ninety_degree_elevation() {
		let obs = wgs84_to_ecef(&PositionWGS84{ latitude: 0.3, longitude: 0.2, height_above_ellipsoid: 0.0 });
		let up  = wgs84_to_ecef(&PositionWGS84{ latitude: 0.3, longitude: 0.2, height_above_ellipsoid: 20.0e6 });
		let (_, el) = az_el(obs, up);
		assert!((el - std::f64::consts::FRAC_PI_2).abs() < 1.0e-6);
	}

}


use nalgebra::{DMatrix, DVector, Vector3, Vector4};
use serde::{Serialize, Deserialize};

use crate::GnssError;
use crate::utils::kinematics::{self, C};

pub mod ephemeris;

use self::ephemeris::{Ephemeris, OMEGA_E};

const MAX_ITER:usize = 10;
const MIN_SV_COUNT:usize = 4;
const CONVERGENCE_M:f64 = 1.0e-4;
const DET_TOL:f64 = 1.0e-12;

/// Pseudorange variance for a satellite well above the horizon [m^2]
const VAR_R:f64 = 25.0;

/// Tropospheric delay assumed before any elevation is known [m]
const TROPO_FIRST_GUESS_M:f64 = 2.0;

/// One satellite's input to a solve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PvtObservation {
	pub prn:usize,
	/// Raw pseudorange [m], not yet corrected for either clock
	pub pseudorange:f64,
	pub eph:Ephemeris,
	/// Elevation from an earlier solution [deg], used for weighting
	pub elevation:Option<f64>,
}

/// Per-satellite results fed back to the observation table
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct SatelliteState {
	pub prn:usize,
	/// Position at transmission, rotated into the ECEF frame at reception [m]
	pub pos_ecef:(f64, f64, f64),
	pub azimuth:f64,      // [deg]
	pub elevation:f64,    // [deg]
	pub residual:f64,     // [m]
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Fix {
	pub pos_ecef:(f64, f64, f64),
	/// Receiver clock bias expressed as a range [m]
	pub clock_bias_m:f64,
	pub latitude:f64,     // [deg]
	pub longitude:f64,    // [deg]
	pub height:f64,       // [m]
	pub gdop:f64,
	/// GPS time of reception, clock bias removed [sec of week]
	pub tow:f64,
	pub week:u16,
	pub sv_count:usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
	pub fix:Fix,
	pub satellites:Vec<SatelliteState>,
}

/// Tropospheric delay [m] from the Goad and Goodman model.  `hsta` is the station height [km], `p` the
/// pressure [mbar], `tkel` the temperature [K] and `hum` the relative humidity [%], measured at heights
/// `hp`, `htkel` and `hhum` [km].
pub fn tropo(sinel:f64, hsta:f64, p:f64, tkel:f64, hum:f64, hp:f64, htkel:f64, hhum:f64) -> f64 {
	let a_e:f64 = 6378.137;           // [km]
	let b0:f64 = 7.839257e-5;
	let tlapse:f64 = -6.5;            // [K/km]

	let tkhum = tkel + tlapse*(hhum - htkel);
	let atkel = 7.5*(tkhum - 273.15) / (237.3 + tkhum - 273.15);
	let e0 = 0.0611 * hum * (10.0_f64).powf(atkel);
	let tksea = tkel - tlapse*htkel;
	let em = -978.77 / (2.8704e6 * tlapse * 1.0e-5);
	let tkelh = tksea + tlapse*hhum;
	let e0sea = e0 * (tksea / tkelh).powf(4.0*em);
	let tkelp = tksea + tlapse*hp;
	let psea = p * (tksea / tkelp).powf(em);

	let sinel = sinel.max(0.0);

	// Dry component first, then wet
	let mut refsea = 77.624e-6 / tksea;
	let mut htop = 1.1385e-5 / refsea;
	refsea *= psea;
	let mut refr = refsea * ((htop - hsta) / htop).powi(4);

	let mut ddr = 0.0;
	for component in 0..2 {
		let rtop = ((a_e + htop).powi(2) - (a_e + hsta).powi(2)*(1.0 - sinel.powi(2))).max(0.0).sqrt() - (a_e + hsta)*sinel;
		let a = -sinel / (htop - hsta);
		let b = -b0*(1.0 - sinel.powi(2)) / (htop - hsta);

		let mut alpha = [0.0; 8];
		alpha[0] = 2.0*a;
		alpha[1] = 2.0*a.powi(2) + 4.0*b/3.0;
		alpha[2] = a*(a.powi(2) + 3.0*b);
		alpha[3] = a.powi(4)/5.0 + 2.4*a.powi(2)*b + 1.2*b.powi(2);
		alpha[4] = 2.0*a*b*(a.powi(2) + 3.0*b)/3.0;
		alpha[5] = b.powi(2)*(6.0*a.powi(2) + 4.0*b)*1.428571e-1;
		if b.powi(2) > 1.0e-35 {
			alpha[6] = a*b.powi(3)/2.0;
			alpha[7] = b.powi(4)/9.0;
		}

		// alpha[7] never enters the sum
		let dr = rtop + (0..7).map(|i| alpha[i] * rtop.powi(i as i32 + 2)).sum::<f64>();
		ddr += dr * refr * 1000.0;

		if component == 0 {
			refsea = (371900.0e-6 / tksea - 12.92e-6) / tksea;
			htop = 1.1385e-5 * (1255.0/tksea + 0.05) / refsea;
			refr = refsea * e0sea * ((htop - hsta) / htop).powi(4);
		}
	}

	ddr
}

/// Standard atmosphere at sea level
pub(crate) fn tropo_standard(el_deg:f64) -> f64 {
	tropo(el_deg.to_radians().sin(), 0.0, 1013.0, 293.0, 50.0, 0.0, 0.0, 0.0)
}

fn pseudorange_variance(el_deg:Option<f64>) -> f64 {
	match el_deg {
		Some(el) if el < 30.0 => VAR_R + (25.0 - (25.0/15.0)*(el - 15.0)).powi(2),
		_ => VAR_R,
	}
}

// Satellite position rotated by the earth's rotation during the signal's travel time
pub(crate) fn sagnac_rotate(sv:&Vector3<f64>, rx:&Vector3<f64>) -> Vector3<f64> {
	let tau = (sv - rx).norm() / C;
	let (s, c) = (OMEGA_E * tau).sin_cos();
	Vector3::new(c*sv[0] + s*sv[1], -s*sv[0] + c*sv[1], sv[2])
}

/// Iterative weighted least squares for position and clock bias
#[derive(Debug, Clone)]
pub struct PvtSolver {
	initial_position:(f64, f64, f64),
	last:Option<Vector4<f64>>,
}

impl PvtSolver {

	pub fn new(initial_position:(f64, f64, f64)) -> Self {
		Self{ initial_position, last: None }
	}

	/// Clock bias of the latest fix [m], zero before the first one
	pub fn clock_bias_m(&self) -> f64 { self.last.map(|x| x[3]).unwrap_or(0.0) }

	pub fn reset(&mut self) { self.last = None; }

	/// Solves for the receiver state at receiver time `rx_tow`.  Pseudoranges are measured against the
	/// receiver clock, so `rx_tow - pr/c` is each satellite's transmit time stamp whatever the clock bias.
	/// Satellites whose orbit propagates to a non-finite position are left out of this solve.
	pub fn solve(&mut self, rx_tow:f64, week:u16, obs:&[PvtObservation]) -> Result<Solution, GnssError> {
		// Satellite positions at transmission and clock-corrected pseudoranges
		let mut used:Vec<(usize, Vector3<f64>, f64, Option<f64>)> = Vec::with_capacity(obs.len());
		for ob in obs.iter() {
			let t_tx = rx_tow - ob.pseudorange / C;
			let ((x, y, z), clk) = ob.eph.pos_and_clock(t_tx);
			if !(x.is_finite() && y.is_finite() && z.is_finite() && clk.is_finite()) {
				log::debug!("PRN {} excluded, non-finite satellite position", ob.prn);
				continue;
			}
			used.push((ob.prn, Vector3::new(x, y, z), ob.pseudorange + C*clk, ob.elevation));
		}

		let n = used.len();
		if n < MIN_SV_COUNT {
			return Err(GnssError::InsufficientSatellites(n));
		}

		let weights = DVector::from_iterator(n, used.iter().map(|u| 1.0 / pseudorange_variance(u.3)));
		let w = DMatrix::from_diagonal(&weights);

		let x0 = self.initial_position;
		let mut x = self.last.unwrap_or_else(|| Vector4::new(x0.0, x0.1, x0.2, 0.0));
		let mut sv_rot:Vec<Vector3<f64>> = used.iter().map(|u| u.1).collect();
		let mut az_el:Vec<(f64, f64)> = vec![(0.0, 0.0); n];
		let mut v = DVector::from_element(n, 0.0);
		let mut q = DMatrix::from_element(4, 4, 0.0);
		let mut converged = false;

		for iter in 0..MAX_ITER {
			let p_ob_e = Vector3::new(x[0], x[1], x[2]);
			let mut h = DMatrix::from_element(n, 4, 0.0);

			for (i, (_, p_sv, pr, _)) in used.iter().enumerate() {
				let trop = if iter == 0 {
					sv_rot[i] = *p_sv;
					TROPO_FIRST_GUESS_M
				} else {
					sv_rot[i] = sagnac_rotate(p_sv, &p_ob_e);
					let (az, el) = kinematics::az_el((x[0], x[1], x[2]), (sv_rot[i][0], sv_rot[i][1], sv_rot[i][2]));
					az_el[i] = (az.to_degrees(), el.to_degrees());
					tropo_standard(az_el[i].1)
				};

				let p_r_e = sv_rot[i] - p_ob_e;
				let r:f64 = p_r_e.norm();
				v[i] = pr - r - x[3] - trop;
				for j in 0..3 { h[(i,j)] = -p_r_e[j] / r; }
				h[(i,3)] = 1.0;
			}

			let hth = h.tr_mul(&h);
			if hth.determinant().abs() < DET_TOL {
				return Err(GnssError::SolverDiverged("singular geometry"));
			}
			q = hth.try_inverse().ok_or(GnssError::SolverDiverged("singular geometry"))?;
			let htwh_inv = (h.tr_mul(&w) * &h).try_inverse().ok_or(GnssError::SolverDiverged("singular weighted normal matrix"))?;

			let dx = htwh_inv * h.tr_mul(&w) * &v;
			x += Vector4::new(dx[0], dx[1], dx[2], dx[3]);

			// The first pass runs without rotation or elevations, so it never counts as converged
			if iter > 0 && dx.norm() < CONVERGENCE_M {
				converged = true;
				break;
			}
		}

		if !converged {
			return Err(GnssError::SolverDiverged("iteration limit reached"));
		}
		let gdop = (q[(0,0)] + q[(1,1)] + q[(2,2)] + q[(3,3)]).sqrt();
		if !(x.iter().all(|a| a.is_finite()) && gdop.is_finite() && gdop > 0.0) {
			return Err(GnssError::SolverDiverged("non-finite solution"));
		}

		self.last = Some(x);

		let geo = kinematics::ecef_to_wgs84(x[0], x[1], x[2]);
		let fix = Fix{
			pos_ecef: (x[0], x[1], x[2]),
			clock_bias_m: x[3],
			latitude: geo.latitude.to_degrees(),
			longitude: geo.longitude.to_degrees(),
			height: geo.height_above_ellipsoid,
			gdop, tow: rx_tow - x[3] / C, week, sv_count: n,
		};

		let satellites = used.iter().enumerate().map(|(i, u)| SatelliteState{
			prn: u.0,
			pos_ecef: (sv_rot[i][0], sv_rot[i][1], sv_rot[i][2]),
			azimuth: az_el[i].0,
			elevation: az_el[i].1,
			residual: v[i],
		}).collect();

		Ok(Solution{ fix, satellites })
	}

}

#[cfg(test)]
pub(crate) mod tests {

	use super::*;
	use super::ephemeris::tests::sample_ephemeris;
	use crate::utils::kinematics::PositionWGS84;

	/// Raw pseudorange a receiver at `rx` whose clock reads `rx_tow` and runs `bias_m` ahead of GPS time
	/// would measure
	pub fn synthetic_pseudorange(eph:&Ephemeris, rx:(f64, f64, f64), bias_m:f64, rx_tow:f64) -> f64 {
		let p_rx = Vector3::new(rx.0, rx.1, rx.2);
		let t_rx = rx_tow - bias_m / C;
		let mut tau = 0.075;
		let mut range = 0.0;
		let mut clk = 0.0;
		let mut sv = Vector3::new(0.0, 0.0, 0.0);
		for _ in 0..10 {
			let ((x, y, z), c) = eph.pos_and_clock(t_rx - tau);
			sv = sagnac_rotate(&Vector3::new(x, y, z), &p_rx);
			range = (sv - p_rx).norm();
			clk = c;
			tau = range / C;
		}
		let (_, el) = kinematics::az_el(rx, (sv[0], sv[1], sv[2]));
		range + bias_m - C*clk + tropo_standard(el.to_degrees())
	}

	pub fn truth_position() -> (f64, f64, f64) {
		kinematics::wgs84_to_ecef(&PositionWGS84{ latitude: 40.0_f64.to_radians(), longitude: -105.0_f64.to_radians(), height_above_ellipsoid: 1600.0 })
	}

	/// Ephemerides of satellites spread over the sky above `truth_position` at the reference epoch
	pub fn visible_constellation(rx_tow:f64, count:usize) -> Vec<Ephemeris> {
		let rx = truth_position();
		let mut ans:Vec<(f64, Ephemeris)> = vec![];
		for plane in 0..6 {
			for slot in 0..8 {
				let eph = sample_ephemeris(0.8*(slot as f64) + 0.3*(plane as f64), -2.2 + 1.05*(plane as f64));
				let ((x, y, z), _) = eph.pos_and_clock(rx_tow);
				let (_, el) = kinematics::az_el(rx, (x, y, z));
				if el.to_degrees() > 20.0 { ans.push((el, eph)); }
			}
		}
		// Highest first, then take every other one so the geometry stays spread
		ans.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
		let mut picked:Vec<Ephemeris> = ans.iter().step_by(2).map(|p| p.1).collect();
		picked.extend(ans.iter().skip(1).step_by(2).map(|p| p.1));
		picked.truncate(count);
		assert_eq!(picked.len(), count, "not enough visible satellites in the test constellation");
		picked
	}

	fn observations(rx_tow:f64, bias_m:f64, count:usize) -> Vec<PvtObservation> {
		visible_constellation(rx_tow, count).into_iter().enumerate().map(|(i, eph)| PvtObservation{
			prn: i + 1, pseudorange: synthetic_pseudorange(&eph, truth_position(), bias_m, rx_tow), eph, elevation: None,
		}).collect()
	}

	fn distance(a:(f64, f64, f64), b:(f64, f64, f64)) -> f64 {
		((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2) + (a.2 - b.2).powi(2)).sqrt()
	}

	#[test]
	fn tropo_is_a_few_meters_at_zenith() {
		let zenith = tropo_standard(90.0);
		assert!(zenith > 2.0 && zenith < 2.8, "zenith delay {}", zenith);
		assert!(tropo_standard(10.0) > 4.0*zenith);
	}

	#[test]
	fn low_elevations_get_less_weight() {
		assert_eq!(pseudorange_variance(None), VAR_R);
		assert_eq!(pseudorange_variance(Some(45.0)), VAR_R);
		assert!(pseudorange_variance(Some(15.0)) > pseudorange_variance(Some(25.0)));
	}

	#[test]
	fn solves_from_earth_center() {
		let rx_tow = 345900.0;
		let mut solver = PvtSolver::new((0.0, 0.0, 0.0));
		let soln = solver.solve(rx_tow, 2370, &observations(rx_tow, 1500.0, 6)).unwrap();

		assert!(distance(soln.fix.pos_ecef, truth_position()) < 1.0, "{:?}", soln.fix);
		assert!((soln.fix.clock_bias_m - 1500.0).abs() < 1.0);
		assert!((soln.fix.latitude - 40.0).abs() < 1.0e-4);
		assert!((soln.fix.height - 1600.0).abs() < 1.0);
		assert!(soln.fix.gdop.is_finite() && soln.fix.gdop > 0.0);
		assert_eq!(soln.fix.sv_count, 6);
		assert!(soln.satellites.iter().all(|s| s.elevation > 15.0 && s.residual.abs() < 1.0));
		assert!((solver.clock_bias_m() - 1500.0).abs() < 1.0);
	}

	#[test]
	fn four_satellites_are_enough() {
		let rx_tow = 346200.0;
		let mut solver = PvtSolver::new(kinematics::wgs84_to_ecef(&PositionWGS84{ latitude: 0.7, longitude: -1.8, height_above_ellipsoid: 0.0 }));
		let soln = solver.solve(rx_tow, 2370, &observations(rx_tow, -300.0, 4)).unwrap();
		assert!(distance(soln.fix.pos_ecef, truth_position()) < 10.0);
		assert!(soln.fix.gdop.is_finite() && soln.fix.gdop > 0.0);
	}

	#[test]
	fn rejects_too_few_or_broken_satellites() {
		let rx_tow = 345900.0;
		let mut solver = PvtSolver::new((0.0, 0.0, 0.0));
		let mut obs = observations(rx_tow, 0.0, 4);

		assert_eq!(solver.solve(rx_tow, 2370, &obs[..3]), Err(GnssError::InsufficientSatellites(3)));

		obs[2].eph.sqrt_a = std::f64::NAN;
		assert_eq!(solver.solve(rx_tow, 2370, &obs), Err(GnssError::InsufficientSatellites(3)));
		assert_eq!(solver.clock_bias_m(), 0.0);
	}

	#[test]
	fn coincident_satellites_are_singular() {
		let rx_tow = 345900.0;
		let mut solver = PvtSolver::new((0.0, 0.0, 0.0));
		let one = observations(rx_tow, 0.0, 1)[0];
		let obs = vec![one; 4];
		assert!(matches!(solver.solve(rx_tow, 2370, &obs), Err(GnssError::SolverDiverged(_))));
	}

}


use serde::{Serialize, Deserialize};

pub const MU:f64 = 3.986005e14;              // [m^3/s^2] WGS-84 value of the earth's gravitational constant
pub const F:f64 = -4.442807633e-10;          // [sec/root-meter], -2*sqrt(mu)/c^2

// IS-GPS-200 calls this OMEGA_DOT_E, but omega_dot would read as an angular acceleration
pub const OMEGA_E:f64 = 7.2921151467e-5;     // [rad/s] WGS-84 value of the earth's rotation rate

const HALF_WEEK:f64 = 302400.0;
const KEPLER_TOL:f64 = 1.0e-12;
const KEPLER_MAX_ITER:usize = 30;

/// Broadcast orbit and clock parameters.  Angles are stored in radians, not semicircles.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Ephemeris {
	pub week:u16,        pub code:u8,     pub sva:u8,      pub svh:u8,
	pub iodc:u16,        pub iode:u8,     pub fit:bool,    pub tgd:f64,
	pub toc:f64,         pub af0:f64,     pub af1:f64,     pub af2:f64,
	pub toe:f64,         pub sqrt_a:f64,  pub dn:f64,      pub m0:f64,
	pub e:f64,           pub omega:f64,   pub omega0:f64,  pub omega_dot:f64,
	pub cus:f64,         pub cuc:f64,     pub crs:f64,     pub crc:f64,
	pub cis:f64,         pub cic:f64,     pub i0:f64,      pub idot:f64,
}

// Time difference folded into +/- half a week
fn week_diff(t:f64, t_ref:f64) -> f64 {
	let mut dt = t - t_ref;
	if dt >  HALF_WEEK { dt -= 2.0*HALF_WEEK; }
	if dt < -HALF_WEEK { dt += 2.0*HALF_WEEK; }
	dt
}

impl Ephemeris {

	/// True once the orbit has a plausible semi-major axis and a week number
	pub fn is_complete(&self) -> bool {
		self.week != 0 && self.sqrt_a > 1000.0 && self.e >= 0.0 && self.e < 1.0
	}

	// Correction factor between the SV clock and GPS system time, without the relativistic term
	pub fn dt_sv(&self, t:f64) -> f64 {
		let tc = week_diff(t, self.toc);
		self.af0 + self.af1*tc + self.af2*tc.powi(2)
	}

	/// Eccentric anomaly for mean anomaly `mk` using Newton-Raphson
	pub fn eccentric_anomaly(&self, mk:f64) -> f64 {
		let mut ek = mk;
		for _ in 0..KEPLER_MAX_ITER {
			let step = (ek - self.e*ek.sin() - mk) / (1.0 - self.e*ek.cos());
			ek -= step;
			if step.abs() < KEPLER_TOL { break; }
		}
		ek
	}

	/// ECEF position [m] and clock bias [sec] at GPS time of week `t`, IS-GPS-200 Table 20-IV
	pub fn pos_and_clock(&self, t:f64) -> ((f64, f64, f64), f64) {
		let a:f64 = self.sqrt_a.powi(2);
		let n0:f64 = (MU / a.powi(3)).sqrt();
		let tk:f64 = week_diff(t, self.toe);
		let n:f64 = n0 + self.dn;

		let mk:f64 = self.m0 + n*tk;
		let ek:f64 = self.eccentric_anomaly(mk);

		let nu_k:f64 = {
			let y:f64 = (1.0 - self.e.powi(2)).sqrt() * ek.sin();
			let x:f64 = ek.cos() - self.e;
			y.atan2(x)
		};

		let phi_k:f64 = nu_k + self.omega;
		let (s2, c2) = (2.0*phi_k).sin_cos();

		let u_k:f64 = phi_k + self.cus*s2 + self.cuc*c2;
		let r_k:f64 = a*(1.0 - self.e*ek.cos()) + self.crs*s2 + self.crc*c2;
		let i_k:f64 = self.i0 + self.cis*s2 + self.cic*c2 + self.idot*tk;

		let x_kp:f64 = r_k * u_k.cos();
		let y_kp:f64 = r_k * u_k.sin();

		let omega_k:f64 = self.omega0 + (self.omega_dot - OMEGA_E)*tk - OMEGA_E*self.toe;

		let x_k:f64 = (x_kp * omega_k.cos()) - (y_kp * i_k.cos() * omega_k.sin());
		let y_k:f64 = (x_kp * omega_k.sin()) + (y_kp * i_k.cos() * omega_k.cos());
		let z_k:f64 = y_kp * i_k.sin();

		// Relativistic correction to transmission time
		let dt_r:f64 = F * self.e * self.sqrt_a * ek.sin();

		((x_k, y_k, z_k), self.dt_sv(t) - self.tgd + dt_r)
	}

}


pub trait ScalarFilter {

	fn apply(&mut self, x:f64) -> f64;
	fn initialize(&mut self);

}

/// Natural frequency terms of a second-order loop with noise bandwidth `b_hz`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopGains {
	/// Proportional gain, 1.414*w
	pub aw: f64,
	/// Integral gain, w^2
	pub w2: f64,
}

impl LoopGains {

	pub fn from_bandwidth(b_hz:f64) -> Self {
		let w = b_hz / 0.53;
		Self{ aw: 1.414 * w, w2: w * w }
	}

}

/// FLL weight for a frequency discriminator with noise bandwidth `b_hz`
pub fn fll_weight(b_hz:f64) -> f64 { b_hz / 0.25 }

/// Second-order NCO filter: `nco += aw*(e - e_prev) + w2*dt*e`
pub struct SecondOrderLoop {
	pub gains: LoopGains,
	pub dt: f64,
	prev_err: f64,
	nco: f64,
}

impl SecondOrderLoop {

	pub fn new(gains:LoopGains, dt:f64) -> Self { Self{ gains, dt, prev_err: 0.0, nco: 0.0 } }

	/// Switches to another gain set without disturbing the NCO state
	pub fn retune(&mut self, gains:LoopGains, dt:f64) {
		self.gains = gains;
		self.dt = dt;
	}

	pub fn nco(&self) -> f64 { self.nco }

	/// Same update with an extra frequency-assist term added to the NCO
	pub fn apply_aided(&mut self, err:f64, assist:f64) -> f64 {
		self.nco += self.gains.aw*(err - self.prev_err) + self.gains.w2*self.dt*err + assist;
		self.prev_err = err;
		self.nco
	}

}

impl ScalarFilter for SecondOrderLoop {

	fn apply(&mut self, x:f64) -> f64 { self.apply_aided(x, 0.0) }

	fn initialize(&mut self) {
		self.prev_err = 0.0;
		self.nco = 0.0;
	}

}

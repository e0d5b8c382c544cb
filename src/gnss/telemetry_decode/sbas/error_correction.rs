
// Rate 1/2, K = 7 convolutional code shared by SBAS L1 and GPS L2C: G1 = 171, G2 = 133 (octal)

const N_STATES:usize = 64;
const G1_TAPS:u8 = 0x4F;
const G2_TAPS:u8 = 0x6D;

fn parity(x:u8) -> bool { x.count_ones() % 2 == 1 }

// Output symbols when `bit` enters an encoder whose previous six bits are `state`, newest in bit 0
fn fec_symbols(state:usize, bit:bool) -> (bool, bool) {
	let reg:u8 = (((state << 1) | (bit as usize)) & 0x7F) as u8;
	(parity(reg & G1_TAPS), parity(reg & G2_TAPS))
}

fn next_state(state:usize, bit:bool) -> usize { ((state << 1) | (bit as usize)) & (N_STATES - 1) }

/// Convolutionally encodes `bits` starting from encoder state `s0`
pub fn encode(bits:&[bool], s0:usize) -> Vec<bool> {
	let mut state = s0 & (N_STATES - 1);
	let mut ans:Vec<bool> = Vec::with_capacity(2*bits.len());
	for b in bits {
		let (g1, g2) = fec_symbols(state, *b);
		ans.push(g1);
		ans.push(g2);
		state = next_state(state, *b);
	}
	ans
}

/// Hard-decision Viterbi decoder.  The encoder state at the first symbol is unknown, so every state starts
/// with the same metric and the traceback begins from the best final state.
pub fn decode(symbols:&[bool]) -> Option<Vec<bool>> {
	let n = symbols.len() / 2;
	if n == 0 { return None; }

	let mut metric:[u32; N_STATES] = [0; N_STATES];
	let mut predecessors:Vec<[u8; N_STATES]> = Vec::with_capacity(n);

	for chunk in symbols.chunks_exact(2) {
		let mut new_metric:[u32; N_STATES] = [u32::MAX; N_STATES];
		let mut pred:[u8; N_STATES] = [0; N_STATES];
		for s in 0..N_STATES {
			for bit in [false, true].iter() {
				let (g1, g2) = fec_symbols(s, *bit);
				let m = metric[s] + ((g1 != chunk[0]) as u32) + ((g2 != chunk[1]) as u32);
				let ns = next_state(s, *bit);
				if m < new_metric[ns] {
					new_metric[ns] = m;
					pred[ns] = s as u8;
				}
			}
		}
		metric = new_metric;
		predecessors.push(pred);
	}

	let mut state:usize = (0..N_STATES).min_by_key(|s| metric[*s])?;
	let mut ans:Vec<bool> = vec![false; n];
	for t in (0..n).rev() {
		ans[t] = state & 1 == 1;
		state = predecessors[t][state] as usize;
	}

	Some(ans)
}

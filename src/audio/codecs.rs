//! Stateless sample transforms used by uncompressed containers
//!
//! Every codec turns raw container bytes into little-endian PCM. The
//! companding codecs expand one input byte into one 16-bit sample and follow
//! the ITU-T G.711 reference expansion.

const SIGN_BIT: u8 = 0x80;
const QUANT_MASK: u8 = 0x0f;
const SEG_SHIFT: u8 = 4;
const SEG_MASK: u8 = 0x70;
const ULAW_BIAS: i16 = 0x84;

/// Expand one G.711 u-law byte to a linear 16-bit sample
pub fn ulaw_to_linear(u_val: u8) -> i16 {
    let u_val = !u_val;
    let mut t = (((u_val & QUANT_MASK) as i16) << 3) + ULAW_BIAS;
    t <<= (u_val & SEG_MASK) >> SEG_SHIFT;
    if u_val & SIGN_BIT != 0 {
        ULAW_BIAS - t
    } else {
        t - ULAW_BIAS
    }
}

/// Expand one G.711 A-law byte to a linear 16-bit sample
pub fn alaw_to_linear(a_val: u8) -> i16 {
    let a_val = a_val ^ 0x55;
    let mut t = ((a_val & QUANT_MASK) as i16) << 4;
    let seg = (a_val & SEG_MASK) >> SEG_SHIFT;
    match seg {
        0 => t += 8,
        1 => t += 0x108,
        _ => {
            t += 0x108;
            t <<= seg - 1;
        }
    }
    if a_val & SIGN_BIT != 0 {
        t
    } else {
        -t
    }
}

/// Transform applied to container bytes before they reach the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleCodec {
    /// Bytes pass through unchanged
    Linear,
    /// Signed 8-bit to unsigned 8-bit
    Signed8,
    /// Big-endian 16-bit to little-endian 16-bit
    Swap16,
    /// u-law byte to 16-bit sample
    ULaw,
    /// A-law byte to 16-bit sample
    ALaw,
}

impl SampleCodec {
    /// Output bytes produced per input byte
    pub fn expansion(self) -> usize {
        match self {
            SampleCodec::Linear | SampleCodec::Signed8 | SampleCodec::Swap16 => 1,
            SampleCodec::ULaw | SampleCodec::ALaw => 2,
        }
    }

    /// Transform `input` into `output`
    ///
    /// `output` must be exactly `input.len() * expansion()` bytes.
    pub fn decode(self, input: &[u8], output: &mut [u8]) {
        debug_assert_eq!(output.len(), input.len() * self.expansion());

        match self {
            SampleCodec::Linear => output.copy_from_slice(input),
            SampleCodec::Signed8 => {
                for (out, &b) in output.iter_mut().zip(input) {
                    *out = b.wrapping_add(128);
                }
            }
            SampleCodec::Swap16 => {
                for (out, pair) in output.chunks_exact_mut(2).zip(input.chunks_exact(2)) {
                    out[0] = pair[1];
                    out[1] = pair[0];
                }
            }
            SampleCodec::ULaw => expand(input, output, ulaw_to_linear),
            SampleCodec::ALaw => expand(input, output, alaw_to_linear),
        }
    }
}

fn expand(input: &[u8], output: &mut [u8], f: fn(u8) -> i16) {
    for (out, &b) in output.chunks_exact_mut(2).zip(input) {
        out.copy_from_slice(&f(b).to_le_bytes());
    }
}

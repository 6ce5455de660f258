//! PDF tables: quantized emission parameters behind the decision trees.
//!
//! Three layouts, all little endian, all validated by length arithmetic:
//!
//! - DUR — phone durations: nibble-packed phone/state quantizer indices,
//!   `numframes × vecsize` frames after the quantizer tables.
//! - MUL — pitch (lfz) and spectral (mgc) parameters: per-state frame
//!   offsets, fixed-point scale powers, `numframes × vecsize` frames.
//! - PHS — phase vectors: u32 index then concatenated variable content.

use crate::error::{OratioError, Result};
use crate::kb::reader::ByteReader;
use crate::kb::KbRegion;

/// Fixed-point scale used for MUL means/variances.
pub const BIG_POW: u8 = 12;
pub const MAX_NUM_STATES: usize = 10;

#[derive(Debug)]
pub struct PdfDur {
    region: KbRegion,
    pub numframes: u16,
    pub vecsize: u8,
    pub sampperframe: u8,
    phonquant: (usize, usize),
    statequant: (usize, usize),
    content: usize,
}

impl PdfDur {
    pub fn specialize(region: KbRegion) -> Result<PdfDur> {
        let mut r = ByteReader::new(region.bytes());
        let numframes = r.u16_le()?;
        let vecsize = r.u8()?;
        let sampperframe = r.u8()?;
        let pql = r.u8()? as usize;
        let phonquant = (r.pos(), pql);
        r.skip(pql)?;
        let sql = r.u8()? as usize;
        let statequant = (r.pos(), sql);
        r.skip(sql)?;
        let content = r.pos();
        if content + numframes as usize * vecsize as usize != region.len() {
            return Err(OratioError::FileCorrupt("dur pdf size mismatch"));
        }
        Ok(PdfDur {
            region,
            numframes,
            vecsize,
            sampperframe,
            phonquant,
            statequant,
            content,
        })
    }

    /// Frame `index` (0-based), `vecsize` bytes.
    pub fn frame(&self, index: usize) -> Option<&[u8]> {
        if index >= self.numframes as usize {
            return None;
        }
        let start = self.content + index * self.vecsize as usize;
        self.region.bytes().get(start..start + self.vecsize as usize)
    }

    /// De-quantize a phone-duration nibble.
    pub fn phonquant(&self, nibble: u8) -> u8 {
        let (start, len) = self.phonquant;
        if (nibble as usize) < len {
            self.region.bytes()[start + nibble as usize]
        } else {
            0
        }
    }

    pub fn statequant(&self, nibble: u8) -> u8 {
        let (start, len) = self.statequant;
        if (nibble as usize) < len {
            self.region.bytes()[start + nibble as usize]
        } else {
            0
        }
    }
}

#[derive(Debug)]
pub struct PdfMul {
    region: KbRegion,
    pub numframes: u16,
    pub vecsize: u8,
    pub numstates: u8,
    pub stateoffset: [u16; MAX_NUM_STATES],
    pub ceporder: u8,
    pub numvuv: u8,
    pub numdeltas: u8,
    pub bigpow: u8,
    pub meanpow: u8,
    pub amplif: u8,
    meanpow_um: Vec<u8>,
    ivarpow: Vec<u8>,
    content: usize,
}

/// Convert a signed 4-bit-coded scale power to a shift relative to
/// [`BIG_POW`]. Returns 0 when the power cannot be represented.
fn scale_factor_to_big(pow: u8, bigpow: u8) -> u8 {
    if pow > 0x0f {
        // negative power in two's complement
        bigpow.wrapping_add(0xffu8.wrapping_sub(pow).wrapping_add(1))
    } else if bigpow >= pow {
        bigpow - pow
    } else {
        0
    }
}

impl PdfMul {
    pub fn specialize(region: KbRegion) -> Result<PdfMul> {
        let mut r = ByteReader::new(region.bytes());
        let numframes = r.u16_le()?;
        let vecsize = r.u8()?;
        let numstates = r.u8()?;
        if numstates as usize > MAX_NUM_STATES || numstates == 0 {
            return Err(OratioError::FileCorrupt("mul pdf state count"));
        }
        let mut stateoffset = [0u16; MAX_NUM_STATES];
        for i in 1..numstates as usize {
            let n = r.u16_le()?;
            stateoffset[i] = stateoffset[i - 1]
                .checked_add(n)
                .ok_or(OratioError::FileCorrupt("mul pdf state offsets"))?;
        }
        r.skip(2)?; // frames of the last state are implied by numframes

        let ceporder = r.u8()?;
        let numvuv = r.u8()?;
        let numdeltas = r.u8()?;
        let scmeanpow = r.u8()?;
        let maxbigpow = r.u8()?;
        if maxbigpow < BIG_POW {
            return Err(OratioError::MaxNumExceeded("mul pdf scale power"));
        }
        let bigpow = BIG_POW;
        let amplif = r.u8()?;
        let meanpow = scale_factor_to_big(scmeanpow, bigpow);
        if meanpow == 0 {
            return Err(OratioError::MaxNumExceeded("mul pdf mean power"));
        }

        let nummean = 3 * ceporder as usize;
        let mut meanpow_um = Vec::with_capacity(nummean);
        for _ in 0..nummean {
            meanpow_um.push(scale_factor_to_big(r.u8()?, bigpow));
        }
        let mut ivarpow = Vec::with_capacity(nummean);
        for _ in 0..nummean {
            ivarpow.push(scale_factor_to_big(r.u8()?, bigpow));
        }

        // vecsize consistency: vuv byte + static/delta means + inverse variances
        let co = ceporder as usize;
        let vuv = numvuv as usize;
        let consistent = if numdeltas == 0xff {
            vecsize as usize == vuv + co * 3 * 3
        } else {
            vecsize as usize == vuv + co * 2 + numdeltas as usize * 3 + co * 3
        };
        if !consistent {
            return Err(OratioError::FileCorrupt("mul pdf vecsize"));
        }

        let content = r.pos();
        if content + numframes as usize * vecsize as usize != region.len() {
            return Err(OratioError::FileCorrupt("mul pdf size mismatch"));
        }
        Ok(PdfMul {
            region,
            numframes,
            vecsize,
            numstates,
            stateoffset,
            ceporder,
            numvuv,
            numdeltas,
            bigpow,
            meanpow,
            amplif,
            meanpow_um,
            ivarpow,
            content,
        })
    }

    pub fn frame(&self, index: usize) -> Option<&[u8]> {
        if index >= self.numframes as usize {
            return None;
        }
        let start = self.content + index * self.vecsize as usize;
        self.region.bytes().get(start..start + self.vecsize as usize)
    }

    pub fn meanpow_um(&self, stream: usize) -> u8 {
        self.meanpow_um.get(stream).copied().unwrap_or(0)
    }

    pub fn ivarpow(&self, stream: usize) -> u8 {
        self.ivarpow.get(stream).copied().unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct PdfPhs {
    region: KbRegion,
    pub numvectors: u16,
    index: usize,
    content: usize,
}

impl PdfPhs {
    pub fn specialize(region: KbRegion) -> Result<PdfPhs> {
        let mut r = ByteReader::new(region.bytes());
        let numvectors = r.u16_le()?;
        let index = r.pos();
        r.skip(numvectors as usize * 4)?;
        let content = r.pos();
        Ok(PdfPhs {
            region,
            numvectors,
            index,
            content,
        })
    }

    /// Byte offset of phase vector `n` inside the content area.
    pub fn vector_offset(&self, n: usize) -> Option<u32> {
        if n >= self.numvectors as usize {
            return None;
        }
        let pos = self.index + n * 4;
        let b = self.region.bytes().get(pos..pos + 4)?;
        Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn content_offset(&self) -> usize {
        self.content
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;

    fn region_of(image: Vec<u8>) -> KbRegion {
        let len = image.len();
        KbRegion::new(Arc::from(image.into_boxed_slice()), 0, len).unwrap()
    }

    /// A DUR pdf whose quantizers are identity over 16 slots.
    pub(crate) fn build_dur_pdf(frames: &[[u8; 3]], sampperframe: u8) -> Vec<u8> {
        let mut image = Vec::new();
        image.extend_from_slice(&(frames.len() as u16).to_le_bytes());
        image.push(3); // vecsize
        image.push(sampperframe);
        image.push(16);
        image.extend(0..16u8);
        image.push(16);
        image.extend(0..16u8);
        for f in frames {
            image.extend_from_slice(f);
        }
        image
    }

    #[test]
    fn dur_pdf_reads_quantizers_and_frames() {
        let pdf =
            PdfDur::specialize(region_of(build_dur_pdf(&[[0x12, 0x34, 0x56]], 64))).unwrap();
        assert_eq!(pdf.numframes, 1);
        assert_eq!(pdf.sampperframe, 64);
        assert_eq!(pdf.frame(0).unwrap(), &[0x12, 0x34, 0x56]);
        assert!(pdf.frame(1).is_none());
        assert_eq!(pdf.phonquant(0x5), 5);
        assert_eq!(pdf.statequant(0xf), 15);
    }

    #[test]
    fn dur_pdf_size_mismatch_is_corrupt() {
        let mut image = build_dur_pdf(&[[1, 2, 3]], 64);
        image.push(0); // trailing garbage breaks the reconciliation
        assert!(matches!(
            PdfDur::specialize(region_of(image)),
            Err(OratioError::FileCorrupt(_))
        ));
    }

    /// A MUL pdf for lfz-style lookups: ceporder 1, numvuv 1, no deltas
    /// (numdeltas = 0xff → vecsize = 1 + 1*3*3 = 10).
    pub(crate) fn build_mul_pdf(frames: &[[u8; 10]], states: u8) -> Vec<u8> {
        let mut image = Vec::new();
        image.extend_from_slice(&(frames.len() as u16).to_le_bytes());
        image.push(10); // vecsize
        image.push(states);
        for _ in 1..states {
            image.extend_from_slice(&1u16.to_le_bytes()); // one frame per state
        }
        image.extend_from_slice(&1u16.to_le_bytes()); // last state (skipped)
        image.push(1); // ceporder
        image.push(1); // numvuv
        image.push(0xff); // numdeltas
        image.push(4); // scmeanpow -> meanpow 8
        image.push(12); // maxbigpow
        image.push(1); // amplif
        image.extend_from_slice(&[2, 2, 2]); // meanpowUm -> 10
        image.extend_from_slice(&[5, 5, 5]); // ivarpow -> 7
        for f in frames {
            image.extend_from_slice(f);
        }
        image
    }

    #[test]
    fn mul_pdf_accumulates_state_offsets() {
        let frames = vec![[0u8; 10]; 5];
        let pdf = PdfMul::specialize(region_of(build_mul_pdf(&frames, 5))).unwrap();
        assert_eq!(pdf.stateoffset[..5], [0, 1, 2, 3, 4]);
        assert_eq!(pdf.meanpow, 8);
        assert_eq!(pdf.meanpow_um(0), 10);
        assert_eq!(pdf.ivarpow(0), 7);
    }

    #[test]
    fn scale_factor_handles_negative_powers() {
        assert_eq!(scale_factor_to_big(4, 12), 8);
        assert_eq!(scale_factor_to_big(0xff, 12), 13); // pow -1
        assert_eq!(scale_factor_to_big(0xfe, 12), 14); // pow -2
        assert_eq!(scale_factor_to_big(15, 12), 0); // cannot represent
    }
}

//! Dependency descriptor RTP header extension (AV1 RTP specification, appendix A).
//!
//! Only what the sender needs is modelled: the mandatory fields on every packet and the
//! template dependency structure that is attached to the first packet of a key frame.

use serde::{Deserialize, Serialize};

use crate::util::bitstream::{BitRead, BitWrite};

/// Largest number of templates a structure can carry (6 bit template id).
pub const MAX_TEMPLATES: usize = 64;

/// Largest number of decode targets (5 bit count minus one).
pub const MAX_DECODE_TARGETS: usize = 32;

/// How a frame relates to one decode target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodeTargetIndication {
    /// Not part of the decode target.
    NotPresent = 0,
    /// Not needed by any later frame of the decode target.
    Discardable = 1,
    /// Decoding can switch to the decode target from this frame.
    Switch = 2,
    /// Part of the decode target, needed by later frames.
    Required = 3,
}

impl DecodeTargetIndication {
    fn from_bits(v: u64) -> Self {
        match v {
            0 => Self::NotPresent,
            1 => Self::Discardable,
            2 => Self::Switch,
            _ => Self::Required,
        }
    }
}

/// One frame template in a [`FrameDependencyStructure`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameDependencyTemplate {
    /// Spatial layer of frames using this template.
    pub spatial_id: u8,
    /// Temporal layer of frames using this template.
    pub temporal_id: u8,
    /// One indication per decode target.
    pub decode_target_indications: Vec<DecodeTargetIndication>,
    /// Differences to the frame numbers of referenced frames, each 1..=16.
    pub frame_diffs: Vec<u16>,
    /// One diff per chain, each 0..=15.
    pub chain_diffs: Vec<u16>,
}

/// Template dependency structure.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameDependencyStructure {
    /// Id of the first template, 0..64.
    pub structure_id: u8,
    /// Number of decode targets.
    pub num_decode_targets: u8,
    /// Number of chains. 0 means no chains are used.
    pub num_chains: u8,
    /// For each decode target, the chain that protects it.
    pub decode_target_protected_by_chain: Vec<u8>,
    /// Templates ordered by spatial id, then temporal id.
    pub templates: Vec<FrameDependencyTemplate>,
    /// Resolution (width, height) per spatial layer, if signalled.
    pub resolutions: Vec<(u16, u16)>,
}

impl FrameDependencyStructure {
    /// A structure for one spatial layer with `temporal_layers` temporal layers.
    ///
    /// Decode target `n` contains all temporal layers up to `n`. No chains.
    pub fn l1tx(temporal_layers: u8) -> Self {
        let n = temporal_layers.clamp(1, 4);
        let templates = (0..n)
            .map(|tid| FrameDependencyTemplate {
                spatial_id: 0,
                temporal_id: tid,
                decode_target_indications: (0..n)
                    .map(|dt| {
                        if dt < tid {
                            DecodeTargetIndication::NotPresent
                        } else if tid == 0 {
                            DecodeTargetIndication::Switch
                        } else {
                            DecodeTargetIndication::Discardable
                        }
                    })
                    .collect(),
                frame_diffs: if tid == 0 { vec![] } else { vec![1] },
                chain_diffs: vec![],
            })
            .collect();

        FrameDependencyStructure {
            structure_id: 0,
            num_decode_targets: n,
            num_chains: 0,
            decode_target_protected_by_chain: vec![],
            templates,
            resolutions: vec![],
        }
    }

    fn is_valid(&self) -> bool {
        let dts = self.num_decode_targets as usize;
        let chains = self.num_chains as usize;

        let sorted = self
            .templates
            .windows(2)
            .all(|w| (w[0].spatial_id, w[0].temporal_id) <= (w[1].spatial_id, w[1].temporal_id));

        let layer_steps_ok = self.templates.windows(2).all(|w| {
            let (a, b) = (&w[0], &w[1]);
            let same_s = a.spatial_id == b.spatial_id;
            let same = same_s && a.temporal_id == b.temporal_id;
            let next_t = same_s && a.temporal_id + 1 == b.temporal_id;
            let next_s = a.spatial_id + 1 == b.spatial_id && b.temporal_id == 0;
            same || next_t || next_s
        });

        !self.templates.is_empty()
            && self.templates.len() <= MAX_TEMPLATES
            && self.templates[0].spatial_id == 0
            && self.templates[0].temporal_id == 0
            && sorted
            && layer_steps_ok
            && self.structure_id < 64
            && (1..=MAX_DECODE_TARGETS).contains(&dts)
            && chains <= dts
            && (chains == 0 || self.decode_target_protected_by_chain.len() == dts)
            && self
                .decode_target_protected_by_chain
                .iter()
                .all(|c| (*c as usize) < chains.max(1))
            && self.templates.iter().all(|t| {
                t.decode_target_indications.len() == dts
                    && t.frame_diffs.iter().all(|d| (1..=16).contains(d))
                    && t.chain_diffs.len() == chains
                    && t.chain_diffs.iter().all(|d| *d < 16)
            })
            && (self.resolutions.is_empty()
                || self.resolutions.len() == self.max_spatial_id() as usize + 1)
    }

    fn max_spatial_id(&self) -> u8 {
        self.templates.iter().map(|t| t.spatial_id).max().unwrap_or(0)
    }

    fn write(&self, w: &mut BitWrite) {
        w.write_bits(self.structure_id as u64, 6);
        w.write_bits(self.num_decode_targets as u64 - 1, 5);

        // template layers
        for (i, t) in self.templates.iter().enumerate() {
            let idc = match self.templates.get(i + 1) {
                None => 3,
                Some(n) if n.spatial_id > t.spatial_id => 2,
                Some(n) if n.temporal_id > t.temporal_id => 1,
                Some(_) => 0,
            };
            w.write_bits(idc, 2);
        }

        // template dtis
        for t in &self.templates {
            for dti in &t.decode_target_indications {
                w.write_bits(*dti as u64, 2);
            }
        }

        // template fdiffs
        for t in &self.templates {
            for fdiff in &t.frame_diffs {
                w.write_bit(true);
                w.write_bits(*fdiff as u64 - 1, 4);
            }
            w.write_bit(false);
        }

        // template chains
        let dts = self.num_decode_targets as u32;
        w.write_non_symmetric(self.num_chains as u32, dts + 1);
        if self.num_chains > 0 {
            for c in &self.decode_target_protected_by_chain {
                w.write_non_symmetric(*c as u32, self.num_chains as u32);
            }
            for t in &self.templates {
                for d in &t.chain_diffs {
                    w.write_bits(*d as u64, 4);
                }
            }
        }

        w.write_bit(!self.resolutions.is_empty());
        for (width, height) in &self.resolutions {
            w.write_bits(width.saturating_sub(1) as u64, 16);
            w.write_bits(height.saturating_sub(1) as u64, 16);
        }
    }

    fn parse(r: &mut BitRead) -> Option<Self> {
        let structure_id = r.read_bits(6)? as u8;
        let num_decode_targets = r.read_bits(5)? as u8 + 1;
        let dts = num_decode_targets as usize;

        let mut templates = Vec::new();
        let mut spatial_id = 0;
        let mut temporal_id = 0;
        loop {
            if templates.len() == MAX_TEMPLATES {
                return None;
            }
            templates.push(FrameDependencyTemplate {
                spatial_id,
                temporal_id,
                ..Default::default()
            });
            match r.read_bits(2)? {
                0 => {}
                1 => temporal_id += 1,
                2 => {
                    temporal_id = 0;
                    spatial_id += 1;
                }
                _ => break,
            }
        }

        for t in &mut templates {
            for _ in 0..dts {
                let dti = DecodeTargetIndication::from_bits(r.read_bits(2)?);
                t.decode_target_indications.push(dti);
            }
        }

        for t in &mut templates {
            while r.read_bit()? {
                t.frame_diffs.push(r.read_bits(4)? as u16 + 1);
            }
        }

        let num_chains = r.read_non_symmetric(dts as u32 + 1)? as u8;
        let mut decode_target_protected_by_chain = Vec::new();
        if num_chains > 0 {
            for _ in 0..dts {
                let chain = r.read_non_symmetric(num_chains as u32)? as u8;
                decode_target_protected_by_chain.push(chain);
            }
            for t in &mut templates {
                for _ in 0..num_chains {
                    t.chain_diffs.push(r.read_bits(4)? as u16);
                }
            }
        }

        let mut resolutions = Vec::new();
        if r.read_bit()? {
            let spatial_layers = spatial_id as usize + 1;
            for _ in 0..spatial_layers {
                let width = r.read_bits(16)? as u16 + 1;
                let height = r.read_bits(16)? as u16 + 1;
                resolutions.push((width, height));
            }
        }

        Some(FrameDependencyStructure {
            structure_id,
            num_decode_targets,
            num_chains,
            decode_target_protected_by_chain,
            templates,
            resolutions,
        })
    }
}

/// Dependency descriptor as carried in one RTP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyDescriptor {
    /// First packet of the frame.
    pub start_of_frame: bool,
    /// Last packet of the frame.
    pub end_of_frame: bool,
    /// Template id, `(structure_id + template index) % 64`.
    pub template_id: u8,
    /// Frame number, the lower 16 bits of the frame id.
    pub frame_number: u16,
    /// Attached structure. Sent on the first packet of a key frame.
    pub structure: Option<FrameDependencyStructure>,
}

impl DependencyDescriptor {
    /// Serialize into the header extension value.
    ///
    /// Returns `None` if the attached structure is inconsistent.
    pub fn serialize(&self) -> Option<Vec<u8>> {
        let mut w = BitWrite::new();
        w.write_bit(self.start_of_frame);
        w.write_bit(self.end_of_frame);
        w.write_bits(self.template_id as u64 & 0x3f, 6);
        w.write_bits(self.frame_number as u64, 16);

        if let Some(structure) = &self.structure {
            if !structure.is_valid() {
                return None;
            }
            // template_dependency_structure_present_flag, then active decode targets,
            // custom dtis, custom fdiffs and custom chains all off.
            w.write_bit(true);
            w.write_bits(0, 4);
            structure.write(&mut w);
        }

        Some(w.into_bytes())
    }

    /// Parse a header extension value.
    ///
    /// Per frame customizations (custom dtis/fdiffs/chains) are skipped over when the
    /// structure is in the same packet, and refused otherwise.
    pub fn parse(buf: &[u8]) -> Result<Self, &'static str> {
        let mut r = BitRead::new(buf);

        let start_of_frame = r.read_bit().ok_or("dd: no start_of_frame")?;
        let end_of_frame = r.read_bit().ok_or("dd: no end_of_frame")?;
        let template_id = r.read_bits(6).ok_or("dd: no template_id")? as u8;
        let frame_number = r.read_bits(16).ok_or("dd: no frame_number")? as u16;

        let mut dd = DependencyDescriptor {
            start_of_frame,
            end_of_frame,
            template_id,
            frame_number,
            structure: None,
        };

        if buf.len() == 3 {
            return Ok(dd);
        }

        let mut flag = || r.read_bit().ok_or("dd: short extended flags");
        let structure_present = flag()?;
        let active_present = flag()?;
        let custom_dtis = flag()?;
        let custom_fdiffs = flag()?;
        let custom_chains = flag()?;

        if !structure_present {
            if active_present || custom_dtis || custom_chains {
                return Err("dd: needs structure from an earlier packet");
            }
        } else {
            let s = FrameDependencyStructure::parse(&mut r).ok_or("dd: short structure")?;
            let dts = s.num_decode_targets as usize;

            if active_present {
                r.read_bits(dts).ok_or("dd: short active decode targets")?;
            }

            let idx = (template_id as usize + 64 - s.structure_id as usize) % 64;
            if idx >= s.templates.len() {
                return Err("dd: template id outside structure");
            }

            if custom_dtis {
                r.read_bits(dts * 2).ok_or("dd: short custom dtis")?;
            }
            if custom_fdiffs {
                skip_fdiffs(&mut r).ok_or("dd: short custom fdiffs")?;
            }
            if custom_chains {
                for _ in 0..s.num_chains {
                    r.read_bits(8).ok_or("dd: short custom chains")?;
                }
            }

            dd.structure = Some(s);
        }

        if !structure_present && custom_fdiffs {
            skip_fdiffs(&mut r).ok_or("dd: short custom fdiffs")?;
        }

        Ok(dd)
    }
}

fn skip_fdiffs(r: &mut BitRead) -> Option<()> {
    // frame_fdiff: 2 bit size, then 4 * size bits fdiff_minus_one, until size 0.
    loop {
        let size = r.read_bits(2)? as usize;
        if size == 0 {
            return Some(());
        }
        r.read_bits(size * 4)?;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mandatory_fields_only() {
        let dd = DependencyDescriptor {
            start_of_frame: true,
            end_of_frame: false,
            template_id: 5,
            frame_number: 0x1234,
            structure: None,
        };
        let buf = dd.serialize().unwrap();
        assert_eq!(buf, vec![0b1000_0101, 0x12, 0x34]);
        assert_eq!(DependencyDescriptor::parse(&buf).unwrap(), dd);
    }

    #[test]
    fn structure_on_key_frame() {
        let mut structure = FrameDependencyStructure::l1tx(3);
        structure.structure_id = 10;
        structure.resolutions = vec![(1280, 720)];

        let dd = DependencyDescriptor {
            start_of_frame: true,
            end_of_frame: true,
            template_id: 10,
            frame_number: 1,
            structure: Some(structure),
        };

        let buf = dd.serialize().unwrap();
        let parsed = DependencyDescriptor::parse(&buf).unwrap();
        assert_eq!(parsed, dd);

        let s = parsed.structure.unwrap();
        assert_eq!(s.templates.len(), 3);
        assert_eq!(s.templates[2].temporal_id, 2);
        assert_eq!(s.templates[1].frame_diffs, vec![1]);
    }

    #[test]
    fn structure_with_chains() {
        let mut structure = FrameDependencyStructure::l1tx(2);
        structure.num_chains = 1;
        structure.decode_target_protected_by_chain = vec![0, 0];
        structure.templates[0].chain_diffs = vec![0];
        structure.templates[1].chain_diffs = vec![1];

        let dd = DependencyDescriptor {
            start_of_frame: true,
            end_of_frame: false,
            template_id: 0,
            frame_number: 7,
            structure: Some(structure),
        };
        let buf = dd.serialize().unwrap();
        assert_eq!(DependencyDescriptor::parse(&buf).unwrap(), dd);
    }

    #[test]
    fn invalid_structure_is_refused() {
        let mut structure = FrameDependencyStructure::l1tx(2);
        structure.templates[1].frame_diffs = vec![17];

        let dd = DependencyDescriptor {
            start_of_frame: true,
            end_of_frame: true,
            template_id: 0,
            frame_number: 0,
            structure: Some(structure),
        };
        assert_eq!(dd.serialize(), None);
    }

    #[test]
    fn truncated_is_error() {
        assert!(DependencyDescriptor::parse(&[0x80, 0x00]).is_err());
    }
}

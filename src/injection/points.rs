// Injection point substitution
//
// A substitution never edits a request in place. `replace` builds a fresh
// region list for the variant: regions before the target are shared, the
// target gets the payload, and every region after it is re-based by the
// payload's length difference so all recorded offsets stay true for the new
// buffer.

use tracing::debug;

use crate::error::{Result, SpliceError};
use crate::models::{InjectionPoint, Region, Request};

impl Request {
    /// Number of injectable regions
    pub fn count(&self) -> usize {
        self.regions.iter().filter(|r| r.injectable).count()
    }

    /// Position in the region list of the `index`th injectable region
    fn region_position(&self, index: usize) -> Option<usize> {
        self.regions
            .iter()
            .enumerate()
            .filter(|(_, r)| r.injectable)
            .nth(index)
            .map(|(pos, _)| pos)
    }

    /// Current byte range of an injection point
    pub fn injection_point(&self, index: usize) -> Option<InjectionPoint> {
        let region = &self.regions[self.region_position(index)?];
        Some(InjectionPoint {
            offset: region.offset,
            length: region.len(),
        })
    }

    /// All injection points in order
    pub fn injection_points(&self) -> Vec<InjectionPoint> {
        self.regions
            .iter()
            .filter(|r| r.injectable)
            .map(|r| InjectionPoint {
                offset: r.offset,
                length: r.len(),
            })
            .collect()
    }

    /// Current content of an injection point
    pub fn injection_value(&self, index: usize) -> Option<&[u8]> {
        self.region_position(index).map(|pos| self.regions[pos].content())
    }

    /// Derive a variant with injection point `index` replaced by `payload`.
    ///
    /// The returned request owns its own region list and substitution record;
    /// `self` is left untouched.
    pub fn replace(&self, index: usize, payload: &[u8]) -> Result<Request> {
        let count = self.count();
        let target = self
            .region_position(index)
            .ok_or(SpliceError::IndexOutOfRange { index, count })?;

        let original_len = self.regions[target].len();
        let mut regions = Vec::with_capacity(self.regions.len());

        for (pos, region) in self.regions.iter().enumerate() {
            if pos < target {
                regions.push(region.clone());
            } else if pos == target {
                regions.push(Region::injectable(region.offset, payload));
            } else {
                // offset >= target end, so this cannot underflow
                let mut shifted = region.clone();
                shifted.offset = region.offset + payload.len() - original_len;
                regions.push(shifted);
            }
        }

        let mut properties = self.properties.clone();
        properties.record(index, payload);

        debug!(
            index,
            original_len,
            payload_len = payload.len(),
            "substituted injection point"
        );

        Ok(Request {
            host: self.host.clone(),
            use_tls: self.use_tls,
            regions,
            properties,
        })
    }
}

use std::ops::Range;

use super::Domain1D;

/// Several domains laid end to end in one global point sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct JointDomain {
    domains: Vec<Domain1D>,
    /// `offsets[i]` is the first global index of domain `i`; the last entry is the total.
    offsets: Vec<usize>,
}

impl Default for JointDomain {
    fn default() -> Self {
        Self {
            domains: Vec::new(),
            offsets: vec![0],
        }
    }
}

impl JointDomain {
    pub fn new() -> Self {
        Self::default()
    }

    /// A joint domain holding a single dataset.
    pub fn single(domain: Domain1D) -> Self {
        let mut joint = Self::new();
        joint.push(domain);
        joint
    }

    pub fn push(&mut self, domain: Domain1D) {
        let end = self.len() + domain.len();
        self.domains.push(domain);
        self.offsets.push(end);
    }

    pub fn n_domains(&self) -> usize {
        self.domains.len()
    }

    /// Total number of points over all domains.
    pub fn len(&self) -> usize {
        self.offsets.last().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn domain(&self, index: usize) -> &Domain1D {
        &self.domains[index]
    }

    pub fn domains(&self) -> &[Domain1D] {
        &self.domains
    }

    /// Global index range of a domain.
    pub fn range(&self, index: usize) -> Range<usize> {
        self.offsets[index]..self.offsets[index + 1]
    }

    /// Map a global index to `(domain, local index)`.
    pub fn locate(&self, global: usize) -> Option<(usize, usize)> {
        if global >= self.len() {
            return None;
        }
        let domain = match self.offsets.binary_search(&global) {
            Ok(mut i) => {
                // Skip empty domains that share the same offset
                while self.offsets[i + 1] == global {
                    i += 1;
                }
                i
            }
            Err(i) => i - 1,
        };
        Some((domain, global - self.offsets[domain]))
    }

    /// All x values, concatenated.
    pub fn x(&self) -> Vec<f64> {
        self.domains
            .iter()
            .flat_map(|d| d.x().iter().copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate() {
        let mut joint = JointDomain::new();
        joint.push(Domain1D::new(vec![0.0, 1.0, 2.0]));
        joint.push(Domain1D::new(vec![10.0, 11.0]));

        assert_eq!(joint.len(), 5);
        assert_eq!(joint.range(1), 3..5);
        assert_eq!(joint.locate(0), Some((0, 0)));
        assert_eq!(joint.locate(2), Some((0, 2)));
        assert_eq!(joint.locate(3), Some((1, 0)));
        assert_eq!(joint.locate(4), Some((1, 1)));
        assert_eq!(joint.locate(5), None);
        assert_eq!(joint.x(), vec![0.0, 1.0, 2.0, 10.0, 11.0]);
    }
}

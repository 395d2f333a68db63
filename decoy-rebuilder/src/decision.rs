use anyhow::{Context, Result, bail};
use csv::ReaderBuilder;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read};
use tracing::{debug, info};

/// Optimizer output for one decoy.
///
/// Values are kept as the optimizer produced them; rounding and clamping
/// happen where they are consumed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecoyPlan {
    /// Subtracted from the anchor time to place the decoy.
    pub time_delta: f64,
    /// Continuous layer selector, rounds to 1 (link), 2 (network), 3 (transport).
    pub truncation_level: f64,
    /// Requested synthetic payload length, possibly negative or fractional.
    pub payload_length: f64,
}

impl DecoyPlan {
    pub fn new(time_delta: f64, truncation_level: f64, payload_length: f64) -> Self {
        Self {
            time_delta,
            truncation_level,
            payload_length,
        }
    }

    /// `payload_length` rounded half to even and clamped at zero.
    pub fn payload_bytes(&self) -> usize {
        rounded_count(self.payload_length)
    }
}

/// Decision data for one anchor packet.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupDecision {
    /// Absolute timestamp given to the anchor in the output.
    pub anchor_time: f64,
    /// Number of decoys to emit. May exceed `decoys.len()`, which the
    /// rebuilder reports as an out-of-range error.
    pub decoy_count: usize,
    pub decoys: Vec<DecoyPlan>,
}

impl GroupDecision {
    /// Decision that uses every listed decoy.
    pub fn new(anchor_time: f64, decoys: Vec<DecoyPlan>) -> Self {
        Self {
            anchor_time,
            decoy_count: decoys.len(),
            decoys,
        }
    }

    pub fn with_count(anchor_time: f64, decoy_count: usize, decoys: Vec<DecoyPlan>) -> Self {
        Self {
            anchor_time,
            decoy_count,
            decoys,
        }
    }
}

/// Full decision vector, one entry per group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecisionVector {
    pub groups: Vec<GroupDecision>,
}

impl DecisionVector {
    pub fn new(groups: Vec<GroupDecision>) -> Self {
        Self { groups }
    }

    /// Builds from the optimizer's numeric tables:
    /// `mal[i] = [anchor_time, decoy_count]` and
    /// `craft[i][j] = [time_delta, truncation_level, payload_length]`.
    pub fn from_raw(mal: &[[f64; 2]], craft: &[Vec<[f64; 3]>]) -> Self {
        let groups = mal
            .iter()
            .enumerate()
            .map(|(i, &[anchor_time, count])| {
                let decoys: Vec<DecoyPlan> = craft
                    .get(i)
                    .map(|row| {
                        row.iter()
                            .map(|&[delta, level, length]| DecoyPlan::new(delta, level, length))
                            .collect()
                    })
                    .unwrap_or_default();
                GroupDecision::with_count(anchor_time, rounded_count(count), decoys)
            })
            .collect();
        Self { groups }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Packets a rebuild of the first `group_count` groups will emit.
    pub fn expected_outputs(&self, group_count: usize) -> usize {
        self.groups
            .iter()
            .take(group_count)
            .map(|group| group.decoy_count + 1)
            .sum()
    }

    pub fn from_csv_path(path: &str) -> Result<Self> {
        info!("Loading decision table: {}", path);
        let file = File::open(path)
            .with_context(|| format!("Failed to open decision file: {}", path))?;
        Self::from_csv_reader(BufReader::new(file))
    }

    /// Reads the CSV form: one row per decoy with columns
    /// `group,anchor_time,decoy_count,time_delta,truncation_level,payload_length`.
    /// A group without decoys is a single row with the three decoy columns empty.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut groups: Vec<GroupDecision> = Vec::new();

        for (row, result) in reader.deserialize().enumerate() {
            let record: DecisionRecord =
                result.with_context(|| format!("Failed to deserialize decision row {}", row + 1))?;
            if !record.anchor_time.is_finite() {
                bail!(
                    "Row {}: anchor_time {} is not a finite timestamp",
                    row + 1,
                    record.anchor_time
                );
            }
            let decoy_count = rounded_count(record.decoy_count);

            if record.group == groups.len() {
                groups.push(GroupDecision::with_count(record.anchor_time, decoy_count, Vec::new()));
            } else if record.group + 1 == groups.len() {
                let current = &groups[record.group];
                if current.anchor_time != record.anchor_time || current.decoy_count != decoy_count {
                    bail!(
                        "Row {}: group {} disagrees with earlier rows on anchor_time/decoy_count",
                        row + 1,
                        record.group
                    );
                }
            } else {
                bail!(
                    "Row {}: group {} out of sequence (expected {} or {})",
                    row + 1,
                    record.group,
                    groups.len().saturating_sub(1),
                    groups.len()
                );
            }

            match (record.time_delta, record.truncation_level, record.payload_length) {
                (Some(delta), Some(level), Some(length)) => {
                    groups[record.group]
                        .decoys
                        .push(DecoyPlan::new(delta, level, length));
                }
                (None, None, None) => {}
                _ => bail!("Row {}: decoy columns must be all set or all empty", row + 1),
            }
        }

        debug!(
            "Decision table: {} groups, {} decoy plans",
            groups.len(),
            groups.iter().map(|g| g.decoys.len()).sum::<usize>()
        );

        Ok(Self { groups })
    }
}

#[derive(Debug, Deserialize)]
struct DecisionRecord {
    group: usize,
    anchor_time: f64,
    decoy_count: f64,
    time_delta: Option<f64>,
    truncation_level: Option<f64>,
    payload_length: Option<f64>,
}

/// Rounds half to even, the way the optimizer's tooling rounds.
pub fn round_half_even(value: f64) -> f64 {
    value.round_ties_even()
}

/// Rounded non-negative count; negative and non-finite values give zero.
pub fn rounded_count(value: f64) -> usize {
    let rounded = round_half_even(value);
    if rounded.is_finite() && rounded > 0.0 {
        rounded as usize
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rounding() {
        assert_eq!(rounded_count(4.6), 5);
        assert_eq!(rounded_count(-3.2), 0);
        assert_eq!(rounded_count(2.5), 2);
        assert_eq!(rounded_count(3.5), 4);
        assert_eq!(rounded_count(f64::NAN), 0);
        assert_eq!(DecoyPlan::new(0.0, 1.0, 0.49).payload_bytes(), 0);
    }

    #[test]
    fn test_from_raw() {
        let mal = [[100.0, 2.0], [200.0, -1.0], [300.0, 1.0]];
        let craft = vec![vec![[1.0, 3.0, 10.0], [2.0, 2.0, 0.0]], vec![]];
        let decision = DecisionVector::from_raw(&mal, &craft);

        assert_eq!(decision.len(), 3);
        assert_eq!(decision.groups[0].decoy_count, 2);
        assert_eq!(decision.groups[0].decoys[1], DecoyPlan::new(2.0, 2.0, 0.0));
        assert_eq!(decision.groups[1].decoy_count, 0);
        // Missing craft row: count survives so the rebuilder can reject it
        assert_eq!(decision.groups[2].decoy_count, 1);
        assert!(decision.groups[2].decoys.is_empty());
        assert_eq!(decision.expected_outputs(2), 4);
    }

    #[test]
    fn test_csv_loading() {
        let csv = "\
group,anchor_time,decoy_count,time_delta,truncation_level,payload_length
0,100.0,2,1.0,3,10
0,100.0,2,2.0,2,0
1,250.5,0,,,
2,300.0,1,0.25,1,4.6
";
        let decision = DecisionVector::from_csv_reader(csv.as_bytes()).unwrap();

        assert_eq!(decision.len(), 3);
        assert_eq!(decision.groups[0].decoys.len(), 2);
        assert_eq!(decision.groups[1], GroupDecision::new(250.5, Vec::new()));
        assert_eq!(decision.groups[2].decoys[0].payload_bytes(), 5);
        assert_eq!(decision.expected_outputs(3), 6);
    }

    #[test]
    fn test_csv_rejects_gaps_and_conflicts() {
        let gap = "\
group,anchor_time,decoy_count,time_delta,truncation_level,payload_length
0,1.0,0,,,
2,1.0,0,,,
";
        assert!(DecisionVector::from_csv_reader(gap.as_bytes()).is_err());

        let conflict = "\
group,anchor_time,decoy_count,time_delta,truncation_level,payload_length
0,1.0,2,0.5,1,1
0,2.0,2,0.5,1,1
";
        assert!(DecisionVector::from_csv_reader(conflict.as_bytes()).is_err());

        let partial = "\
group,anchor_time,decoy_count,time_delta,truncation_level,payload_length
0,1.0,1,0.5,,1
";
        assert!(DecisionVector::from_csv_reader(partial.as_bytes()).is_err());
    }

    #[test]
    fn test_csv_rejects_non_finite_anchor_time() {
        for value in ["NaN", "inf", "-inf"] {
            let csv = format!(
                "group,anchor_time,decoy_count,time_delta,truncation_level,payload_length\n\
                 0,{value},2,1.0,3,10\n\
                 0,{value},2,2.0,2,0\n"
            );
            let err = DecisionVector::from_csv_reader(csv.as_bytes()).unwrap_err();
            assert!(err.to_string().contains("not a finite timestamp"), "{}", err);
        }
    }
}

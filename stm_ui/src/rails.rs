//! Supply-rail sanity check run at start-up.
//!
//! Each rail is read through a divider into the housekeeping ADC; a reading
//! more than `allowed_variance` codes away from its expected code fails.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RailReadings {
    pub v5: u16,
    pub v10: u16,
    pub v3v3: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RailMonitor {
    pub expected: RailReadings,
    pub allowed_variance: u16,
}

impl Default for RailMonitor {
    fn default() -> Self {
        Self {
            expected: RailReadings {
                v5: 488,
                v10: 573,
                v3v3: 492,
            },
            allowed_variance: 20,
        }
    }
}

impl From<&stm_config::Rails> for RailMonitor {
    fn from(r: &stm_config::Rails) -> Self {
        Self {
            expected: RailReadings {
                v5: r.expected_5v,
                v10: r.expected_10v,
                v3v3: r.expected_3v3,
            },
            allowed_variance: r.allowed_variance,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RailCheck {
    pub name: &'static str,
    pub reading: u16,
    pub expected: u16,
    pub ok: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RailReport {
    pub rails: [RailCheck; 3],
}

impl RailReport {
    pub fn all_ok(&self) -> bool {
        self.rails.iter().all(|r| r.ok)
    }

    pub fn failures(&self) -> impl Iterator<Item = &RailCheck> {
        self.rails.iter().filter(|r| !r.ok)
    }
}

impl fmt::Display for RailReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, r) in self.rails.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            let verdict = if r.ok { "ok" } else { "FAIL" };
            write!(f, "{} {} ({}/{})", r.name, verdict, r.reading, r.expected)?;
        }
        Ok(())
    }
}

impl RailMonitor {
    pub fn nominal(&self) -> RailReadings {
        self.expected
    }

    pub fn check(&self, readings: RailReadings) -> RailReport {
        let rail = |name, reading: u16, expected: u16| RailCheck {
            name,
            reading,
            expected,
            ok: reading.abs_diff(expected) <= self.allowed_variance,
        };
        let e = self.expected;
        let report = RailReport {
            rails: [
                rail("5V", readings.v5, e.v5),
                rail("10V", readings.v10, e.v10),
                rail("3V3", readings.v3v3, e.v3v3),
            ],
        };
        for r in report.failures() {
            tracing::warn!(rail = r.name, reading = r.reading, expected = r.expected, "supply rail out of range");
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(488, 573, 492, true)]
    #[case(508, 553, 472, true)]
    #[case(509, 573, 492, false)]
    #[case(488, 0, 492, false)]
    fn variance_band_is_inclusive(
        #[case] v5: u16,
        #[case] v10: u16,
        #[case] v3v3: u16,
        #[case] ok: bool,
    ) {
        let report = RailMonitor::default().check(RailReadings { v5, v10, v3v3 });
        assert_eq!(report.all_ok(), ok);
    }

    #[test]
    fn report_names_the_failing_rail() {
        let m = RailMonitor::default();
        let report = m.check(RailReadings {
            v10: 400,
            ..m.nominal()
        });
        assert_eq!(report.failures().map(|r| r.name).collect::<Vec<_>>(), vec!["10V"]);
        assert_eq!(report.to_string(), "5V ok (488/488), 10V FAIL (400/573), 3V3 ok (492/492)");
    }

    #[test]
    fn config_overrides_expectations() {
        let cfg = stm_config::Rails {
            expected_5v: 500,
            ..stm_config::Rails::default()
        };
        let m = RailMonitor::from(&cfg);
        assert_eq!(m.expected.v5, 500);
        assert_eq!(m.allowed_variance, 20);
    }
}

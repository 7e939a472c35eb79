// src/io/serial/ports.rs
//
// Port catalog: which serial endpoints exist right now, and which one is
// the best bet for the sensor device. Scoring is pluggable; the default
// scorer matches known USB-serial signatures and favours ports that have
// already worked.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use super::reader::PortBackend;
use super::utils::PortInfo;

// ============================================================================
// Scoring
// ============================================================================

const SCORE_VID_PID_MATCH: i32 = 60;
const SCORE_VID_MATCH: i32 = 40;
const SCORE_KEYWORD_MATCH: i32 = 25;
const SCORE_USB: i32 = 10;
const SCORE_PREVIOUSLY_USED: i32 = 20;
/// Bonus for the port we are already connected to, so that an equally good
/// port never triggers a switch.
const SCORE_ACTIVE: i32 = 15;

/// A known device signature. Any field left out matches everything.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSignature {
    #[serde(default)]
    pub vid: Option<u16>,
    #[serde(default)]
    pub pid: Option<u16>,
    /// Case-insensitive substring of the manufacturer or product string
    #[serde(default)]
    pub keyword: Option<String>,
}

/// Signatures of the USB-serial bridges commonly found on sensor boards
pub fn default_device_signatures() -> Vec<DeviceSignature> {
    let sig = |vid: u16, keyword: &str| DeviceSignature {
        vid: Some(vid),
        pid: None,
        keyword: Some(keyword.to_string()),
    };
    vec![
        sig(0x2341, "arduino"),
        sig(0x1A86, "ch340"),
        sig(0x0403, "ftdi"),
        sig(0x10C4, "cp210"),
    ]
}

/// What the scorer knows about the link beyond the port itself
pub struct ScoreContext<'a> {
    /// Port the link is currently using, if any
    pub active: Option<&'a str>,
    /// Ports that have opened successfully during this process
    pub previously_used: &'a HashSet<String>,
}

/// Port scoring strategy. Higher is better.
pub trait PortScorer: Send + Sync {
    fn score(&self, port: &PortInfo, ctx: &ScoreContext<'_>) -> i32;
}

/// Default strategy: signature match, USB transport, history, stability
pub struct SignatureScorer {
    signatures: Vec<DeviceSignature>,
}

impl SignatureScorer {
    pub fn new(signatures: Vec<DeviceSignature>) -> Self {
        SignatureScorer { signatures }
    }

    fn signature_score(&self, port: &PortInfo) -> i32 {
        let text = format!(
            "{} {}",
            port.manufacturer.as_deref().unwrap_or(""),
            port.product.as_deref().unwrap_or("")
        )
        .to_lowercase();

        self.signatures
            .iter()
            .map(|sig| {
                let mut score = 0;
                if let Some(vid) = sig.vid {
                    if port.vid == Some(vid) {
                        score += match sig.pid {
                            Some(pid) if port.pid == Some(pid) => SCORE_VID_PID_MATCH,
                            Some(_) => 0,
                            None => SCORE_VID_MATCH,
                        };
                    }
                }
                if let Some(ref keyword) = sig.keyword {
                    if !keyword.is_empty() && text.contains(&keyword.to_lowercase()) {
                        score += SCORE_KEYWORD_MATCH;
                    }
                }
                score
            })
            .max()
            .unwrap_or(0)
    }
}

impl Default for SignatureScorer {
    fn default() -> Self {
        SignatureScorer::new(default_device_signatures())
    }
}

impl PortScorer for SignatureScorer {
    fn score(&self, port: &PortInfo, ctx: &ScoreContext<'_>) -> i32 {
        let mut score = self.signature_score(port);
        if port.is_usb() {
            score += SCORE_USB;
        }
        if ctx.previously_used.contains(&port.port_name) {
            score += SCORE_PREVIOUSLY_USED;
        }
        if ctx.active == Some(port.port_name.as_str()) {
            score += SCORE_ACTIVE;
        }
        score
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// A scored port. Recomputed on every scan, never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PortCandidate {
    pub path: String,
    pub score: i32,
    pub info: PortInfo,
}

#[derive(Clone)]
pub struct PortCatalog {
    scorer: Arc<dyn PortScorer>,
}

impl PortCatalog {
    pub fn new(scorer: Arc<dyn PortScorer>) -> Self {
        PortCatalog { scorer }
    }

    /// Enumerate ports through the backend and rank them.
    pub fn scan(
        &self,
        backend: &dyn PortBackend,
        ctx: &ScoreContext<'_>,
    ) -> Result<Vec<PortCandidate>, String> {
        let ports = backend.available_ports()?;
        Ok(self.rank(ports, ctx))
    }

    /// Score and sort. Highest score first; equal scores keep discovery order.
    pub fn rank(&self, ports: Vec<PortInfo>, ctx: &ScoreContext<'_>) -> Vec<PortCandidate> {
        let mut candidates: Vec<PortCandidate> = ports
            .into_iter()
            .map(|info| PortCandidate {
                path: info.port_name.clone(),
                score: self.scorer.score(&info, ctx),
                info,
            })
            .collect();
        // sort_by is stable, so ties stay in discovery order
        candidates.sort_by(|a, b| b.score.cmp(&a.score));
        candidates
    }
}

/// Best candidate, or `None` when nothing is available
pub fn best_candidate(candidates: &[PortCandidate]) -> Option<&PortCandidate> {
    candidates.first()
}

/// A candidate strictly better than the active port.
///
/// Returns `None` when the active port is the best, is tied with the best, or
/// is missing from the list (an unplugged port is handled by the read loop).
pub fn better_than_active<'a>(
    candidates: &'a [PortCandidate],
    active: &str,
) -> Option<&'a PortCandidate> {
    let active_score = candidates.iter().find(|c| c.path == active)?.score;
    candidates
        .first()
        .filter(|best| best.path != active && best.score > active_score)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usb(name: &str, vid: u16, manufacturer: &str) -> PortInfo {
        PortInfo {
            port_name: name.to_string(),
            port_type: "USB".to_string(),
            manufacturer: Some(manufacturer.to_string()),
            vid: Some(vid),
            pid: Some(0x0001),
            ..Default::default()
        }
    }

    fn plain(name: &str) -> PortInfo {
        PortInfo {
            port_name: name.to_string(),
            port_type: "PCI".to_string(),
            ..Default::default()
        }
    }

    fn catalog() -> PortCatalog {
        PortCatalog::new(Arc::new(SignatureScorer::default()))
    }

    #[test]
    fn test_signature_match_ranks_first() {
        let used = HashSet::new();
        let ctx = ScoreContext { active: None, previously_used: &used };
        let ranked = catalog().rank(
            vec![plain("/dev/ttyS0"), usb("/dev/ttyUSB0", 0x1A86, "QinHeng Electronics CH340")],
            &ctx,
        );
        assert_eq!(ranked[0].path, "/dev/ttyUSB0");
        assert_eq!(ranked[0].score, SCORE_VID_MATCH + SCORE_KEYWORD_MATCH + SCORE_USB);
        assert_eq!(ranked[1].score, 0);
    }

    #[test]
    fn test_ties_keep_discovery_order() {
        let used = HashSet::new();
        let ctx = ScoreContext { active: None, previously_used: &used };
        let ranked = catalog().rank(vec![plain("/dev/ttyS1"), plain("/dev/ttyS0")], &ctx);
        assert_eq!(ranked[0].path, "/dev/ttyS1");
        assert_eq!(ranked[1].path, "/dev/ttyS0");
    }

    #[test]
    fn test_empty_scan_has_no_best() {
        let used = HashSet::new();
        let ctx = ScoreContext { active: None, previously_used: &used };
        let ranked = catalog().rank(Vec::new(), &ctx);
        assert!(best_candidate(&ranked).is_none());
    }

    #[test]
    fn test_active_port_wins_ties() {
        let used = HashSet::new();
        let ctx = ScoreContext { active: Some("/dev/ttyACM1"), previously_used: &used };
        let ranked = catalog().rank(
            vec![
                usb("/dev/ttyACM0", 0x2341, "Arduino"),
                usb("/dev/ttyACM1", 0x2341, "Arduino"),
            ],
            &ctx,
        );
        assert_eq!(ranked[0].path, "/dev/ttyACM1");
        assert!(better_than_active(&ranked, "/dev/ttyACM1").is_none());
    }

    #[test]
    fn test_strictly_better_port_is_offered() {
        let used = HashSet::new();
        let ctx = ScoreContext { active: Some("/dev/ttyS0"), previously_used: &used };
        let ranked = catalog().rank(
            vec![plain("/dev/ttyS0"), usb("/dev/ttyACM0", 0x2341, "Arduino")],
            &ctx,
        );
        let better = better_than_active(&ranked, "/dev/ttyS0").unwrap();
        assert_eq!(better.path, "/dev/ttyACM0");
    }

    #[test]
    fn test_missing_active_port_offers_nothing() {
        let used = HashSet::new();
        let ctx = ScoreContext { active: Some("/dev/gone"), previously_used: &used };
        let ranked = catalog().rank(vec![usb("/dev/ttyACM0", 0x2341, "Arduino")], &ctx);
        assert!(better_than_active(&ranked, "/dev/gone").is_none());
    }

    #[test]
    fn test_previously_used_bonus() {
        let mut used = HashSet::new();
        used.insert("/dev/ttyS4".to_string());
        let ctx = ScoreContext { active: None, previously_used: &used };
        let ranked = catalog().rank(vec![plain("/dev/ttyS0"), plain("/dev/ttyS4")], &ctx);
        assert_eq!(ranked[0].path, "/dev/ttyS4");
        assert_eq!(ranked[0].score, SCORE_PREVIOUSLY_USED);
    }

    #[test]
    fn test_vid_pid_signature() {
        let scorer = SignatureScorer::new(vec![DeviceSignature {
            vid: Some(0x0403),
            pid: Some(0x6001),
            keyword: None,
        }]);
        let used = HashSet::new();
        let ctx = ScoreContext { active: None, previously_used: &used };

        let mut port = usb("/dev/ttyUSB0", 0x0403, "FTDI");
        port.pid = Some(0x6001);
        assert_eq!(scorer.score(&port, &ctx), SCORE_VID_PID_MATCH + SCORE_USB);

        port.pid = Some(0x6015);
        assert_eq!(scorer.score(&port, &ctx), SCORE_USB);
    }
}

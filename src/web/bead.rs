use chrono::{DateTime, Utc};

use crate::core::bead::Bead;
use crate::core::meta::InputSpec;
use crate::error::Result;
use crate::web::freshness::Freshness;
use crate::web::graph::Ref;

/// A bead as the provenance web sees it: the metadata view plus freshness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebBead {
    pub name: String,
    pub kind: String,
    pub content_id: String,
    pub freeze_time_str: String,
    pub freeze_time: DateTime<Utc>,
    pub inputs: Vec<InputSpec>,
    pub box_name: String,
    freshness: Freshness,
}

impl WebBead {
    pub fn from_bead(bead: &Bead) -> Self {
        WebBead {
            name: bead.name.as_str().to_string(),
            kind: bead.kind.clone(),
            content_id: bead.content_id.as_str().to_string(),
            freeze_time_str: bead.freeze_time_str.clone(),
            freeze_time: bead.freeze_time,
            inputs: bead.inputs.clone(),
            box_name: bead.box_name.clone(),
            freshness: Freshness::Superseded,
        }
    }

    /// Synthesize a stand-in for an input that no known bead satisfies.
    ///
    /// The phantom takes the input's local alias as its name and the
    /// referenced kind, content id and freeze time.
    pub fn phantom_from_input(spec: &InputSpec) -> Result<Self> {
        Ok(WebBead {
            name: spec.name.clone(),
            kind: spec.kind.clone(),
            content_id: spec.content_id.clone(),
            freeze_time_str: spec.freeze_time.clone(),
            freeze_time: spec.freeze_time_instant()?,
            inputs: Vec::new(),
            box_name: String::new(),
            freshness: Freshness::Phantom,
        })
    }

    pub fn bead_ref(&self) -> Ref {
        Ref::new(&self.name, &self.content_id)
    }

    pub fn freshness(&self) -> Freshness {
        self.freshness
    }

    pub fn is_phantom(&self) -> bool {
        self.freshness == Freshness::Phantom
    }

    /// Phantom is sticky: once phantom, always phantom.
    pub fn set_freshness(&mut self, freshness: Freshness) {
        if self.freshness != Freshness::Phantom {
            self.freshness = freshness;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::meta::{BeadName, ContentId};

    fn input_spec() -> InputSpec {
        InputSpec::new(
            "dep-alias".to_string(),
            "dep-kind".to_string(),
            "dep-content".to_string(),
            "20240115T120000000000+0000".to_string(),
        )
    }

    #[test]
    fn test_from_bead_starts_superseded() {
        let bead = Bead::new(
            BeadName::new("b").unwrap(),
            "k".to_string(),
            ContentId::new("cid"),
            "20240115T120000000000+0000".to_string(),
            vec![],
            "box".to_string(),
        )
        .unwrap();
        let web_bead = WebBead::from_bead(&bead);
        assert_eq!(web_bead.freshness(), Freshness::Superseded);
        assert_eq!(web_bead.bead_ref(), Ref::new("b", "cid"));
    }

    #[test]
    fn test_phantom_takes_alias_as_name() {
        let phantom = WebBead::phantom_from_input(&input_spec()).unwrap();
        assert_eq!(phantom.name, "dep-alias");
        assert_eq!(phantom.kind, "dep-kind");
        assert_eq!(phantom.content_id, "dep-content");
        assert!(phantom.is_phantom());
    }

    #[test]
    fn test_phantom_freshness_is_sticky() {
        let mut phantom = WebBead::phantom_from_input(&input_spec()).unwrap();
        phantom.set_freshness(Freshness::UpToDate);
        assert_eq!(phantom.freshness(), Freshness::Phantom);
        phantom.set_freshness(Freshness::Superseded);
        assert_eq!(phantom.freshness(), Freshness::Phantom);
    }
}

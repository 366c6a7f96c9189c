//! Query generation for collocation support counts
//!
//! The re-ranking stage needs three counts per candidate: the pivot alone
//! within the grammatical relation (Fx), the collocate alone (Fy) and the
//! joint occurrence (Fxy). Generators turn (pivot, collocate) pairs into
//! the positional queries producing those counts; the rest of the system
//! treats the query strings as opaque.

use corq_common::config::SketchConfig;

/// A pivot word, optionally constrained to a part of speech
#[derive(Debug, Clone)]
pub struct Word {
    pub value: String,
    pub pos: Option<String>,
}

impl Word {
    pub fn new(value: &str) -> Self {
        Word {
            value: value.to_string(),
            pos: None,
        }
    }
}

pub trait QueryGenerator: Send + Sync {
    /// Relation identifier the generated queries belong to; part of the
    /// memoization key
    fn relation(&self) -> &str;

    fn fx_query(&self, word: &Word) -> String;

    fn fy_query(&self, collocate: &str) -> String;

    fn fxy_query(&self, word: &Word, collocate: &str) -> String;
}

/// Queries for the noun-subject-of-verb relation: the pivot is a subject
/// noun, the collocate its governing verb lemma
pub struct VerbSubjectQGen {
    conf: SketchConfig,
}

impl VerbSubjectQGen {
    pub fn new(conf: SketchConfig) -> Self {
        VerbSubjectQGen { conf }
    }
}

impl QueryGenerator for VerbSubjectQGen {
    fn relation(&self) -> &str {
        "verb-subject"
    }

    fn fx_query(&self, word: &Word) -> String {
        let c = &self.conf;
        match &word.pos {
            Some(pos) => format!(
                "[{}=\"{}\" & {}=\"{}\" & {}=\"{}\" & {}=\"{}\"]",
                c.lemma_attr, word.value, c.pos_attr, pos, c.func_attr, c.noun_subject_value,
                c.parent_pos_attr, c.verb_value
            ),
            None => format!(
                "[{}=\"{}\" & {}=\"{}\" & {}=\"{}\"]",
                c.lemma_attr, word.value, c.func_attr, c.noun_subject_value,
                c.parent_pos_attr, c.verb_value
            ),
        }
    }

    fn fy_query(&self, collocate: &str) -> String {
        let c = &self.conf;
        format!(
            "[{}=\"{}\" & {}=\"{}\" & {}=\"{}\"]",
            c.func_attr, c.noun_subject_value, c.parent_pos_attr, c.verb_value,
            c.parent_lemma_attr, collocate
        )
    }

    fn fxy_query(&self, word: &Word, collocate: &str) -> String {
        let c = &self.conf;
        format!(
            "[{}=\"{}\" & {}=\"{}\" & {}=\"{}\" & {}=\"{}\"]",
            c.lemma_attr, word.value, c.func_attr, c.noun_subject_value,
            c.parent_pos_attr, c.verb_value, c.parent_lemma_attr, collocate
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verb_subject_queries() {
        let qgen = VerbSubjectQGen::new(SketchConfig::default());
        let word = Word::new("team");
        assert_eq!(
            qgen.fx_query(&word),
            r#"[lemma="team" & deprel="nsubj" & p_upos="VERB"]"#
        );
        assert_eq!(
            qgen.fy_query("win"),
            r#"[deprel="nsubj" & p_upos="VERB" & p_lemma="win"]"#
        );
        assert_eq!(
            qgen.fxy_query(&word, "win"),
            r#"[lemma="team" & deprel="nsubj" & p_upos="VERB" & p_lemma="win"]"#
        );
    }

    #[test]
    fn test_pos_constrained_pivot() {
        let qgen = VerbSubjectQGen::new(SketchConfig::default());
        let word = Word {
            value: "team".to_string(),
            pos: Some("NOUN".to_string()),
        };
        assert_eq!(
            qgen.fx_query(&word),
            r#"[lemma="team" & upos="NOUN" & deprel="nsubj" & p_upos="VERB"]"#
        );
    }
}

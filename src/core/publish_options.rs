use crate::core::types::{
    Dictionary,
    Value,
};

/// Options for publishing an event.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishOptions {
    /// Should the router acknowledge the publication with a PUBLISHED message?
    ///
    /// Without acknowledgement, the publish is fire-and-forget: its event channel closes
    /// immediately without emitting anything.
    pub acknowledge: bool,
}

impl PublishOptions {
    /// The options dictionary written into the PUBLISH message.
    pub fn into_dictionary(self) -> Dictionary {
        let mut dictionary = Dictionary::default();
        if self.acknowledge {
            dictionary.insert("acknowledge".to_owned(), Value::Bool(true));
        }
        dictionary
    }
}

#[cfg(test)]
mod publish_options_test {
    use crate::core::{
        publish_options::PublishOptions,
        types::{
            Dictionary,
            Value,
        },
    };

    #[test]
    fn acknowledge_appears_only_when_requested() {
        assert!(PublishOptions::default().into_dictionary().is_empty());
        assert_eq!(
            PublishOptions { acknowledge: true }.into_dictionary(),
            Dictionary::from_iter([("acknowledge".to_owned(), Value::Bool(true))]),
        );
    }
}

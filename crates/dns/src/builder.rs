use crate::{
    message::{DnsFlags, DnsMessage, DnsQuestion, DnsResponseCode},
    record::DnsRecord,
};

/// Builds queries and synthesized responses. Starts out as a recursive query.
#[derive(Debug, Clone, Default)]
pub struct DnsMessageBuilder {
    id: u16,
    flags: DnsFlags,
    questions: Vec<DnsQuestion>,
    answers: Vec<DnsRecord>,
    authority_records: Vec<DnsRecord>,
    additional_records: Vec<DnsRecord>,
    response_code: Option<DnsResponseCode>,
}

impl DnsMessageBuilder {
    pub fn new() -> Self {
        Self {
            flags: DnsFlags {
                recursion_desired: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: u16) -> Self {
        self.id = id;
        self
    }

    pub fn add_question(mut self, question: DnsQuestion) -> Self {
        self.questions.push(question);
        self
    }

    pub fn add_answer(mut self, answer: DnsRecord) -> Self {
        self.answers.push(answer);
        self
    }

    pub fn add_authority_record(mut self, record: DnsRecord) -> Self {
        self.authority_records.push(record);
        self
    }

    pub fn add_additional_record(mut self, record: DnsRecord) -> Self {
        self.additional_records.push(record);
        self
    }

    /// Turn the message into a response with the given code.
    pub fn with_response(mut self, response_code: DnsResponseCode) -> Self {
        self.response_code = Some(response_code);
        self
    }

    pub fn build(self) -> DnsMessage {
        let mut message = DnsMessage::new(
            self.id,
            self.flags,
            self.questions,
            self.answers,
            self.authority_records,
            self.additional_records,
        );

        if let Some(rcode) = self.response_code {
            message.flags.response = true;
            message.set_response_code(rcode);
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let message = DnsMessageBuilder::new().with_id(7).build();
        assert_eq!(message.id, 7);
        assert!(message.flags.recursion_desired);
        assert!(!message.flags.response);
        assert!(message.edns().is_none());
    }

    #[test]
    fn test_response_code() {
        let message = DnsMessageBuilder::new()
            .with_response(DnsResponseCode::NxDomain)
            .build();
        assert!(message.flags.response);
        assert_eq!(message.rcode(), 3);

        let message = DnsMessageBuilder::new()
            .with_response(DnsResponseCode::BADCOOKIE)
            .build();
        assert_eq!(message.rcode(), 23);
        assert!(message.edns().is_some());
    }
}

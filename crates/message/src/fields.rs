//! The address-list header field kinds a `Message` indexes by (spec §3:
//! "address lists indexed by header field type").

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFieldKind {
    From,
    Sender,
    ReplyTo,
    To,
    Cc,
    Bcc,
    ReturnPath,
    ResentFrom,
    ResentTo,
    ResentCc,
    ResentBcc,
    ResentSender,
}

impl AddressFieldKind {
    pub fn header_name(self) -> &'static str {
        match self {
            AddressFieldKind::From => "From",
            AddressFieldKind::Sender => "Sender",
            AddressFieldKind::ReplyTo => "Reply-To",
            AddressFieldKind::To => "To",
            AddressFieldKind::Cc => "Cc",
            AddressFieldKind::Bcc => "Bcc",
            AddressFieldKind::ReturnPath => "Return-Path",
            AddressFieldKind::ResentFrom => "Resent-From",
            AddressFieldKind::ResentTo => "Resent-To",
            AddressFieldKind::ResentCc => "Resent-Cc",
            AddressFieldKind::ResentBcc => "Resent-Bcc",
            AddressFieldKind::ResentSender => "Resent-Sender",
        }
    }

    pub const ALL: [AddressFieldKind; 12] = [
        AddressFieldKind::From,
        AddressFieldKind::Sender,
        AddressFieldKind::ReplyTo,
        AddressFieldKind::To,
        AddressFieldKind::Cc,
        AddressFieldKind::Bcc,
        AddressFieldKind::ReturnPath,
        AddressFieldKind::ResentFrom,
        AddressFieldKind::ResentTo,
        AddressFieldKind::ResentCc,
        AddressFieldKind::ResentBcc,
        AddressFieldKind::ResentSender,
    ];
}

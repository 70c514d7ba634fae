use k9::assert_equal;
use mailheaders::{
    write_fields, AddrSpec, Decoder, EncoderOptions, HeaderField, HeaderLoader, Mailbox,
    MailboxListValue, ParameterList, PhraseValue, RawField, ScratchPool, StructuredValue,
    UnstructuredValue,
};

fn wire(field: &mut HeaderField) -> String {
    field.to_wire_string(&EncoderOptions::default()).unwrap()
}

fn lines(wire: &str) -> Vec<&str> {
    wire.strip_suffix("\r\n").unwrap().split("\r\n").collect()
}

/// Load the serialized field back the way a receiver would
fn reload(wire: &str) -> RawField {
    let mut fields = RawField::parse_block(wire.as_bytes()).unwrap();
    assert_equal!(fields.len(), 1);
    let field = fields.remove(0);
    assert!(field.conformance.is_empty(), "{}", field.conformance);
    field
}

fn attachment(name: &str, value: &str) -> HeaderField {
    let mut params = ParameterList::new();
    params.set(name, value).unwrap();
    HeaderField::new(
        "Content-Disposition",
        StructuredValue::new("attachment").unwrap(),
    )
    .unwrap()
    .with_parameters(params)
}

#[test]
fn extended_parameter_prolog() {
    let value = "Résumé für das Jahr 2024 mit sehr langen Namen.pdf";
    let wire = wire(&mut attachment("filename", value));
    let lines = lines(&wire);
    assert_equal!(lines[0], "Content-Disposition: attachment;");
    assert!(lines[1].starts_with(" filename*0*=utf-8''R%C3%A9sum%C3%A9"));
    for line in &lines {
        assert!(line.len() <= 78, "{line:?}");
    }

    let field = reload(&wire);
    let (disposition, params) = Decoder::decode_atom_and_parameter_list(&field.value).unwrap();
    assert_equal!(disposition, "attachment");
    assert_equal!(params.get("filename"), Some(value));
}

#[test]
fn unstructured_merged_encoded_word() {
    let text = "1:  §2 \t ДВА   ©1999...2001";
    let mut field = HeaderField::new("Subject", UnstructuredValue::new(text)).unwrap();
    let wire = wire(&mut field);
    assert_equal!(
        wire,
        "Subject: 1:  =?utf-8?B?wqcyIAkg0JTQktCQICAgwqkxOTk5Li4uMjAwMQ==?=\r\n"
    );

    let field = reload(&wire);
    assert_equal!(Decoder::decode_unstructured(&field.value).unwrap(), text);
}

#[test]
fn phrase_merging() {
    let mut field =
        HeaderField::new("X-Phrase", PhraseValue::new("@ABYZ value 0123456789;")).unwrap();
    assert_equal!(wire(&mut field), "X-Phrase: \"@ABYZ value 0123456789;\"\r\n");

    let text = "@ABYZ §2000 0123456789;";
    let mut field = HeaderField::new("X-Phrase", PhraseValue::new(text)).unwrap();
    let wire = wire(&mut field);
    assert_equal!(
        wire,
        "X-Phrase: \"@ABYZ\" =?utf-8?B?wqcyMDAw?= \"0123456789;\"\r\n"
    );
    let field = reload(&wire);
    assert_equal!(Decoder::decode_phrase(&field.value).unwrap(), text);
}

#[test]
fn filename_continuations() {
    let value = "функции of the module ведомости report.pdf";
    let wire = wire(&mut attachment("filename", value));
    assert_equal!(
        lines(&wire),
        vec![
            "Content-Disposition: attachment;",
            " filename*0*=utf-8''%D1%84%D1%83%D0%BD%D0%BA%D1%86%D0%B8%D0%B8;",
            " filename*1=\" of the module \";",
            " filename*2*=%D0%B2%D0%B5%D0%B4%D0%BE%D0%BC%D0%BE%D1%81%D1%82%D0%B8;",
            " filename*3=\" report.pdf\"",
        ]
    );

    let field = reload(&wire);
    let (_, params) = Decoder::decode_atom_and_parameter_list(&field.value).unwrap();
    assert_equal!(params.get("filename"), Some(value));
}

#[test]
fn decode_adjacent_encoded_word() {
    let fields = RawField::parse_block(b"Subject: aa =?utf-8?Q?123;abc?=\r\n\r\nbody").unwrap();
    assert_equal!(fields.len(), 1);
    assert_equal!(
        Decoder::decode_unstructured(&fields[0].value).unwrap(),
        "aa 123;abc"
    );
}

#[test]
fn long_subject_round_trip() {
    let text = "Ceci est un résumé très important concernant la réunion de demain \
                matin à neuf heures précises dans la salle numéro deux du bâtiment";
    let mut field = HeaderField::new("Subject", UnstructuredValue::new(text)).unwrap();
    let wire = wire(&mut field);
    let lines = lines(&wire);
    assert!(lines.len() > 1);
    for line in &lines {
        assert!(line.len() <= 78, "{line:?}");
        assert!(!line.trim().is_empty());
    }

    let field = reload(&wire);
    assert_equal!(field.name, "Subject");
    assert_equal!(Decoder::decode_unstructured(&field.value).unwrap(), text);
}

#[test]
fn header_block() {
    let options = EncoderOptions::default();
    let pool = ScratchPool::default();
    let mailboxes = vec![
        Mailbox::new(
            Some("Jöhn Smith"),
            AddrSpec::new("john", "example.com").unwrap(),
        ),
        Mailbox::new(
            Some("Ops, \"Team\""),
            AddrSpec::new("ops", "example.com").unwrap(),
        ),
        Mailbox::new(None, AddrSpec::new("jane", "example.com").unwrap()),
    ];
    let mut fields = vec![
        HeaderField::new("To", MailboxListValue::new(mailboxes.clone())).unwrap(),
        HeaderField::new("Subject", UnstructuredValue::new("Grüße")).unwrap(),
    ];

    let mut out = vec![];
    write_fields(&mut fields, &pool, &options, &mut out, None).unwrap();
    out.extend_from_slice(b"\r\nbody\r\n");

    let loaded: Vec<RawField> = HeaderLoader::new(out.as_slice())
        .collect::<mailheaders::Result<_>>()
        .unwrap();
    assert_equal!(loaded.len(), 2);
    assert_equal!(
        Decoder::decode_mailbox_list(&loaded[0].value).unwrap(),
        mailboxes
    );
    assert_equal!(
        Decoder::decode_unstructured(&loaded[1].value).unwrap(),
        "Grüße"
    );
}

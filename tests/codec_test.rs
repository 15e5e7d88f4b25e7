use rusty_chat::protocol::{
    decode, encode, status, ChannelAction, ChannelPayload, Codec, DecodeError, MessageType,
    Payload, PayloadKind, Visibility, WireEncoding,
};

#[test]
fn test_message_wire_shape() {
    let payload = Payload::with_timestamp(
        1700000000,
        PayloadKind::Message {
            sender: "alice".to_string(),
            content: "hello".to_string(),
        },
    );
    assert_eq!(encode(&payload), "MSG|1700000000|alice|5|hello\r\n");
}

#[test]
fn test_decode_message_with_separator_in_content() {
    let payload = decode("MSG|1700000000|alice|5|hi|yo\r\n").unwrap();
    assert_eq!(payload.timestamp, 1700000000);
    assert_eq!(
        payload.kind,
        PayloadKind::Message {
            sender: "alice".to_string(),
            content: "hi|yo".to_string(),
        }
    );
}

#[test]
fn test_every_type_survives_a_round_trip() {
    let channel = ChannelPayload::builder()
        .action(ChannelAction::Create)
        .requester("alice")
        .channel("rust")
        .password("s3cret")
        .size(4)
        .status(status::SUCCESS)
        .visibility(Visibility::Private)
        .build()
        .unwrap();

    let payloads = vec![
        Payload::message("alice", "hello | world"),
        Payload::whisper("alice", "bob", "psst"),
        Payload::system("bob has joined the chat.", status::SUCCESS),
        Payload::error("boom"),
        Payload::login("alice", "pa|ss word"),
        Payload::user("alice", status::BLOCK),
        Payload::active_users(vec!["alice".to_string(), "bob".to_string()], status::RES),
        Payload::active_users(Vec::new(), status::RES),
        Payload::history(
            "alice",
            vec![encode(&Payload::message("bob", "a,b|c"))],
            status::RES,
        ),
        Payload::new(PayloadKind::Encryption {
            sender: "alice".to_string(),
            recipient: "bob".to_string(),
            key: "MIIBIjANBgkq".to_string(),
            status: "offer".to_string(),
        }),
        Payload::channel(channel),
    ];

    for payload in payloads {
        let line = encode(&payload);
        assert!(line.ends_with("\r\n"));
        let decoded = decode(&line).unwrap();
        assert_eq!(decoded, payload, "round trip of {}", line.trim_end());
    }
}

#[test]
fn test_length_mismatch_is_rejected() {
    let err = decode("MSG|1700000000|alice|3|hello\r\n").unwrap_err();
    assert_eq!(
        err,
        DecodeError::LengthMismatch {
            declared: 3,
            actual: 5
        }
    );
}

#[test]
fn test_length_mismatch_for_every_length_prefixed_type() {
    for line in [
        "WSP|1|alice|bob|3|hello\r\n",
        "SYS|1|3|hello|success\r\n",
        "ERR|1|3|hello\r\n",
    ] {
        assert_eq!(
            decode(line),
            Err(DecodeError::LengthMismatch {
                declared: 3,
                actual: 5
            }),
            "decoding {}",
            line.trim_end()
        );
    }
}

#[test]
fn test_multibyte_content_length_counts_bytes() {
    let payload = Payload::message("alice", "héllo");
    let line = encode(&payload);
    assert!(line.contains("|6|héllo"));
    assert!(decode("MSG|1|alice|5|héllo").is_err());
}

#[test]
fn test_too_few_fields() {
    match decode("WSP|1700000000|alice\r\n") {
        Err(DecodeError::TooFewFields { message_type, .. }) => {
            assert_eq!(message_type, MessageType::Whisper)
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn test_unsupported_type() {
    assert!(matches!(
        decode("NOPE|1|x\r\n"),
        Err(DecodeError::UnsupportedType(tag)) if tag == "NOPE"
    ));
    assert!(matches!(decode(""), Err(DecodeError::UnsupportedType(_))));
}

#[test]
fn test_bad_timestamp_is_malformed() {
    assert!(matches!(
        decode("MSG|yesterday|alice|2|hi"),
        Err(DecodeError::Malformed(_))
    ));
}

#[test]
fn test_channel_failure_reason_is_preserved() {
    let reply = ChannelPayload::builder()
        .action(ChannelAction::Join)
        .requester("carol")
        .channel("x")
        .status(status::FAIL)
        .reason("Channel is full. Try again later.")
        .build()
        .unwrap();
    let line = encode(&Payload::channel(reply));

    let decoded = decode(&line).unwrap();
    match decoded.kind {
        PayloadKind::Channel(channel) => {
            assert_eq!(channel.action(), ChannelAction::Join);
            assert_eq!(channel.channel(), Some("x"));
            assert_eq!(channel.args().status.as_deref(), Some(status::FAIL));
            assert_eq!(
                channel.args().reason.as_deref(),
                Some("Channel is full. Try again later.")
            );
        }
        other => panic!("expected a channel payload, got {:?}", other),
    }
}

#[test]
fn test_base64_encoding_wraps_whole_frame() {
    let codec = Codec::new(WireEncoding::Base64);
    let payload = Payload::whisper("alice", "bob", "secret");
    let line = codec.encode(&payload);

    assert!(line.ends_with("\r\n"));
    assert!(!line.trim_end().contains('|'));
    assert_eq!(codec.decode(&line).unwrap(), payload);
    assert!(Codec::plain().decode(&line).is_err());
}

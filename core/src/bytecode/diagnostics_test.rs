use super::*;

#[test]
fn hex_dump_rows_of_sixteen() {
    let data: Vec<u8> = (0u8..20).collect();
    let dump = hex_dump(&data, DEFAULT_HEX_DUMP_BYTES);
    let lines: Vec<&str> = dump.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "00 01 02 03 04 05 06 07 08 09 0a 0b 0c 0d 0e 0f ");
    assert_eq!(lines[1], "10 11 12 13 ");
    assert!(dump.ends_with('\n'));
}

#[test]
fn hex_dump_full_row_has_single_newline() {
    let dump = hex_dump(&[0xAB; 16], 64);
    assert_eq!(dump.matches('\n').count(), 1);
    assert!(dump.starts_with("ab ab"));
}

#[test]
fn hex_dump_truncates_and_handles_empty() {
    assert_eq!(hex_dump(&[1, 2, 3, 4], 2), "01 02 \n");
    assert_eq!(hex_dump(&[], 64), "");
}

#[test]
fn constants_render_for_listings() {
    assert_eq!(Constant::Number(3.5).to_string(), "3.5");
    assert_eq!(Constant::Boolean(true).to_string(), "true");
    assert_eq!(Constant::string("a\"b\n").to_string(), "\"a\\\"b\\n\"");
    assert_eq!(Constant::Table(vec![0, 2]).to_string(), "{K0, K2}");
    assert_eq!(Constant::Nil.to_string(), "nil");
}

#[test]
fn info_reports_a_valid_module() {
    let bytes = create_push_string("hi");
    let info = BytecodeInfo::inspect(&bytes).expect("inspect");
    assert!(info.valid);
    assert!(!info.signed);
    assert_eq!(info.version, BYTECODE_VERSION);
    assert_eq!(info.size as usize, bytes.len() - HEADER_SIZE);
    assert_eq!(info.constants, vec!["\"hi\"".to_string()]);
    assert_eq!((info.functions, info.instructions, info.max_stack_size), (1, 1, 1));

    let text = bytecode_info(&bytes);
    assert!(text.contains("status:      valid"));
    assert!(text.contains("K0   \"hi\""));
}

#[test]
fn info_reports_problems_and_short_buffers() {
    let mut bytes = create_push_number(1.0);
    let last = bytes.len() - 1;
    bytes[last] ^= 1;
    let info = BytecodeInfo::inspect(&bytes).expect("inspect");
    assert!(!info.valid);
    assert!(info.problem.as_deref().is_some_and(|p| p.contains("hash")));

    assert!(bytecode_info(b"short").starts_with("invalid bytecode"));
}

#[test]
fn info_sees_through_signature_wrapper() {
    let inner = create_push_boolean(true);
    let mut signed = SIGNATURE_MAGIC.to_vec();
    for word in [9u32, 8, 7, 6] {
        signed.extend_from_slice(&word.to_le_bytes());
    }
    signed.extend_from_slice(&inner);

    let info = BytecodeInfo::inspect(&signed).expect("inspect");
    assert!(info.signed);
    assert!(info.valid);
    assert_eq!(info.signature, Some([9, 8, 7, 6]));
    assert_eq!(info.length, inner.len() + SIGNATURE_SIZE);
}

#[test]
fn info_serializes_to_json() {
    let info = BytecodeInfo::inspect(&create_push_nil()).expect("inspect");
    let json: serde_json::Value = serde_json::to_value(&info).expect("json");
    assert_eq!(json["valid"], serde_json::Value::Bool(true));
    assert_eq!(json["version"], 2);
    assert!(json.get("problem").is_none());
    assert!(json.get("signature").is_none());
}

#[test]
fn disassembly_lists_constants_and_offsets() {
    let bytes = create_function_call("warn", &["oops"], 0).expect("call");
    let listing = disassemble(&bytes).expect("disassemble");
    assert!(listing.starts_with("; version 2"));
    assert!(listing.contains("constants (2)"));
    assert!(listing.contains("K0   string  \"warn\""));
    assert!(listing.contains("function 0 (maxstack 2, params 0, upvalues 0)"));
    assert!(listing.contains("  0000  GETGLOBAL    R0 K0"));
    assert!(listing.contains("  0005  LOADK        R1 K1"));
    assert!(listing.contains("  0008  CALL         R0 args=2 results=1"));
}

#[test]
fn disassembly_rejects_garbage() {
    assert!(disassemble(&[0u8; 4]).is_err());
}

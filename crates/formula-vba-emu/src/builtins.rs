//! Default library catalog.
//!
//! Only a core of string/conversion functions plus the entries malware most often uses to act on
//! the host (shell, object creation, downloads, memory writes). Callers extend the registry with
//! [`Library::register`].

use chrono::{Local, Timelike};

use crate::ast::VbaType;
use crate::context::Context;
use crate::error::EmuError;
use crate::library::{Library, LibraryFunction};
use crate::limits::alloc_len;
use crate::value::VbaValue;

fn arg(args: &[VbaValue], idx: usize) -> VbaValue {
    args.get(idx).cloned().unwrap_or(VbaValue::Null)
}

fn str_arg(args: &[VbaValue], idx: usize) -> String {
    arg(args, idx).to_string_lossy()
}

fn chars(s: &str) -> Vec<char> {
    s.chars().collect()
}

fn chr(args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    let code = arg(args, 0).to_int();
    let c = u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| EmuError::runtime(format!("Invalid character code {code}")))?;
    Ok(VbaValue::String(c.to_string()))
}

fn asc(args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    let s = str_arg(args, 0);
    let c = s
        .chars()
        .next()
        .ok_or_else(|| EmuError::runtime("Asc of an empty string"))?;
    Ok(VbaValue::Integer(c as i64))
}

fn len(args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    Ok(VbaValue::Integer(str_arg(args, 0).chars().count() as i64))
}

fn mid(args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    let s = chars(&str_arg(args, 0));
    let start = arg(args, 1).to_int();
    if start < 1 {
        return Err(EmuError::runtime(format!("Invalid Mid start {start}")));
    }
    let from = (start as usize - 1).min(s.len());
    let count = match args.get(2) {
        Some(v) if !v.is_empty_like() => v.to_int().max(0) as usize,
        _ => s.len(),
    };
    let to = from.saturating_add(count).min(s.len());
    Ok(VbaValue::String(s[from..to].iter().collect()))
}

fn left(args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    let n = arg(args, 1).to_int().max(0) as usize;
    Ok(VbaValue::String(str_arg(args, 0).chars().take(n).collect()))
}

fn right(args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    let s = chars(&str_arg(args, 0));
    let n = (arg(args, 1).to_int().max(0) as usize).min(s.len());
    Ok(VbaValue::String(s[s.len() - n..].iter().collect()))
}

fn lcase(args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    Ok(VbaValue::String(str_arg(args, 0).to_lowercase()))
}

fn ucase(args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    Ok(VbaValue::String(str_arg(args, 0).to_uppercase()))
}

fn trim(args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    Ok(VbaValue::String(str_arg(args, 0).trim_matches(' ').to_string()))
}

fn ltrim(args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    Ok(VbaValue::String(
        str_arg(args, 0).trim_start_matches(' ').to_string(),
    ))
}

fn rtrim(args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    Ok(VbaValue::String(str_arg(args, 0).trim_end_matches(' ').to_string()))
}

fn replace(args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    let find = str_arg(args, 1);
    let s = str_arg(args, 0);
    if find.is_empty() {
        return Ok(VbaValue::String(s));
    }
    Ok(VbaValue::String(s.replace(&find, &str_arg(args, 2))))
}

fn instr(args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    let (start, hay, needle) = if args.len() >= 3 && args[0].is_numeric() {
        (arg(args, 0).to_int().max(1) as usize, str_arg(args, 1), str_arg(args, 2))
    } else {
        (1, str_arg(args, 0), str_arg(args, 1))
    };
    let hay = chars(&hay);
    let needle = chars(&needle);
    if start > hay.len() + 1 {
        return Ok(VbaValue::Integer(0));
    }
    if needle.is_empty() {
        return Ok(VbaValue::Integer(start as i64));
    }
    let pos = hay[start - 1..]
        .windows(needle.len())
        .position(|w| w == needle.as_slice());
    Ok(VbaValue::Integer(pos.map_or(0, |p| (p + start) as i64)))
}

fn strreverse(args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    Ok(VbaValue::String(str_arg(args, 0).chars().rev().collect()))
}

fn cstr(args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    Ok(VbaValue::String(str_arg(args, 0)))
}

fn cint(args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    let v = arg(args, 0).to_number();
    Ok(VbaValue::Integer(match v {
        VbaValue::Float(f) => f.round_ties_even() as i64,
        other => other.to_int(),
    }))
}

fn cbyte(args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    let v = arg(args, 0).to_int();
    if !(0..=255).contains(&v) {
        return Err(EmuError::Runtime {
            number: 6,
            message: format!("Overflow converting {v} to Byte"),
        });
    }
    Ok(VbaValue::Integer(v))
}

fn cdbl(args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    Ok(VbaValue::Float(arg(args, 0).to_f64()))
}

fn val(args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    let s: String = str_arg(args, 0).chars().filter(|c| !c.is_whitespace()).collect();
    let end = s
        .char_indices()
        .take_while(|(i, c)| c.is_ascii_digit() || *c == '.' || (*i == 0 && (*c == '-' || *c == '+')))
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .unwrap_or(0);
    Ok(VbaValue::from(s[..end].to_string()).to_number())
}

fn hex(args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    Ok(VbaValue::String(format!("{:X}", arg(args, 0).to_int())))
}

/// Character count requested by `Space`/`String`.
fn repeat_count(args: &[VbaValue]) -> Result<usize, EmuError> {
    let n = arg(args, 0).to_int();
    alloc_len(n).ok_or_else(|| EmuError::out_of_string_space(format!("{n} characters requested")))
}

fn space(args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    Ok(VbaValue::String(" ".repeat(repeat_count(args)?)))
}

fn string(args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    let n = repeat_count(args)?;
    let c = match arg(args, 1) {
        VbaValue::String(s) => s.chars().next().unwrap_or(' '),
        other => u32::try_from(other.to_int())
            .ok()
            .and_then(char::from_u32)
            .unwrap_or(' '),
    };
    Ok(VbaValue::String(std::iter::repeat(c).take(n).collect()))
}

fn split(args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    let s = str_arg(args, 0);
    let delim = match args.get(1) {
        Some(v) if !v.is_empty_like() => v.to_string_lossy(),
        _ => " ".to_string(),
    };
    if delim.is_empty() {
        return Ok(VbaValue::new_list(vec![VbaValue::String(s)]));
    }
    Ok(VbaValue::new_list(
        s.split(delim.as_str()).map(VbaValue::from).collect(),
    ))
}

fn join(args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    let delim = match args.get(1) {
        Some(v) if !v.is_empty_like() => v.to_string_lossy(),
        _ => " ".to_string(),
    };
    let items = match arg(args, 0) {
        VbaValue::List(items) => items
            .borrow()
            .iter()
            .map(VbaValue::to_string_lossy)
            .collect::<Vec<_>>(),
        other => vec![other.to_string_lossy()],
    };
    Ok(VbaValue::String(items.join(&delim)))
}

fn array(args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    Ok(VbaValue::new_list(args.to_vec()))
}

fn ubound(args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    match arg(args, 0) {
        VbaValue::List(items) => Ok(VbaValue::Integer(items.borrow().len() as i64 - 1)),
        VbaValue::String(s) => Ok(VbaValue::Integer(s.chars().count() as i64 - 1)),
        other => Err(EmuError::type_mismatch(format!(
            "UBound of {}",
            other.type_name()
        ))),
    }
}

fn lbound(_args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    Ok(VbaValue::Integer(0))
}

fn abs(args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    Ok(match arg(args, 0).to_number() {
        VbaValue::Float(f) => VbaValue::Float(f.abs()),
        other => VbaValue::Integer(other.to_int().wrapping_abs()),
    })
}

fn int(args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    Ok(VbaValue::Integer(arg(args, 0).to_f64().floor() as i64))
}

fn fix(args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    Ok(VbaValue::Integer(arg(args, 0).to_f64().trunc() as i64))
}

fn is_numeric(args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    let v = arg(args, 0);
    let numeric = match &v {
        VbaValue::Integer(_) | VbaValue::Float(_) => true,
        VbaValue::String(s) => s.trim().parse::<f64>().is_ok(),
        _ => false,
    };
    Ok(VbaValue::Boolean(numeric))
}

fn now(_ctx: &mut Context, _args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    Ok(VbaValue::String(
        Local::now().format("%m/%d/%Y %I:%M:%S %p").to_string(),
    ))
}

fn date(_ctx: &mut Context, _args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    Ok(VbaValue::String(Local::now().format("%m/%d/%Y").to_string()))
}

fn timer(_ctx: &mut Context, _args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    let t = Local::now();
    Ok(VbaValue::Float(
        t.num_seconds_from_midnight() as f64 + f64::from(t.nanosecond() / 1_000_000) / 1000.0,
    ))
}

fn shell(ctx: &mut Context, args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    ctx.report_action("Execute Command", &str_arg(args, 0), "Shell function");
    Ok(VbaValue::Integer(0))
}

fn run(ctx: &mut Context, args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    ctx.report_action("Execute Command", &str_arg(args, 0), "Interesting Function Call");
    Ok(VbaValue::Integer(0))
}

fn create_object(ctx: &mut Context, args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    let class = str_arg(args, 0);
    ctx.report_action("CreateObject", &class, "Interesting Function Call");
    Ok(VbaValue::Object(crate::value::VbaObjectRef::new(class)))
}

fn get_object(ctx: &mut Context, args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    let path = str_arg(args, 0);
    ctx.report_action("GetObject", &path, "Interesting Function Call");
    Ok(VbaValue::Object(crate::value::VbaObjectRef::new(path)))
}

fn dynamic_execution(ctx: &mut Context, args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    ctx.report_action("Dynamic Execution", &str_arg(args, 0), "Execute/Eval");
    Ok(VbaValue::Null)
}

fn environ(_ctx: &mut Context, args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    let name = str_arg(args, 0).to_ascii_uppercase();
    let value = match name.as_str() {
        "TEMP" | "TMP" => "C:\\Users\\admin\\AppData\\Local\\Temp".to_string(),
        "APPDATA" => "C:\\Users\\admin\\AppData\\Roaming".to_string(),
        "USERPROFILE" => "C:\\Users\\admin".to_string(),
        "USERNAME" => "admin".to_string(),
        "WINDIR" | "SYSTEMROOT" => "C:\\Windows".to_string(),
        _ => format!("%{name}%"),
    };
    Ok(VbaValue::String(value))
}

fn msgbox(ctx: &mut Context, args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    ctx.report_action("Display Message", &str_arg(args, 0), "MsgBox");
    Ok(VbaValue::Integer(1))
}

fn url_download_to_file(ctx: &mut Context, args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    let url = str_arg(args, 1);
    let file = str_arg(args, 2);
    ctx.report_action("Download URL", &url, "URLDownloadToFile");
    ctx.report_action("Write File", &file, "URLDownloadToFile");
    Ok(VbaValue::Integer(0))
}

/// `XMLHTTP.Open method, url`
fn http_open(ctx: &mut Context, args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    let method = str_arg(args, 0).to_ascii_uppercase();
    ctx.report_action(&method, &str_arg(args, 1), "Interesting Function Call");
    Ok(VbaValue::Null)
}

fn save_to_file(ctx: &mut Context, args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    ctx.report_action("Write File", &str_arg(args, 0), "ADODB.Stream SaveToFile");
    Ok(VbaValue::Null)
}

/// `RtlMoveMemory dest, src, len`: copies `len` bytes of `src` to the emulated address `dest`.
fn rtl_move_memory(ctx: &mut Context, args: &[VbaValue]) -> Result<VbaValue, EmuError> {
    for (address, b) in moved_bytes(args) {
        ctx.set_shellcode_byte(address, i64::from(b));
    }
    Ok(VbaValue::Integer(0))
}

/// Address/byte pairs written by a `RtlMoveMemory dest, src, len` call. Bytes that would land
/// past the top of the address space are dropped.
pub(crate) fn moved_bytes(args: &[VbaValue]) -> Vec<(i64, u8)> {
    let dest = arg(args, 0).to_int();
    let count = arg(args, 2).to_int().max(0) as usize;
    let bytes = match arg(args, 1) {
        VbaValue::Integer(v) => v.to_le_bytes().to_vec(),
        other => other.to_bytes(),
    };
    bytes
        .into_iter()
        .take(count)
        .enumerate()
        .map_while(|(i, b)| Some((dest.checked_add(i64::try_from(i).ok()?)?, b)))
        .collect()
}

pub(crate) fn register_defaults(lib: &mut Library) {
    use VbaType::{Integer, String as Str};

    let pure: &[(&str, std::ops::RangeInclusive<usize>, Option<VbaType>, crate::library::PureFn)] = &[
        ("Chr", 1..=1, Some(Str), chr),
        ("ChrW", 1..=1, Some(Str), chr),
        ("ChrB", 1..=1, Some(Str), chr),
        ("Asc", 1..=1, Some(Integer), asc),
        ("AscW", 1..=1, Some(Integer), asc),
        ("AscB", 1..=1, Some(Integer), asc),
        ("Len", 1..=1, Some(Integer), len),
        ("Mid", 2..=3, Some(Str), mid),
        ("Left", 2..=2, Some(Str), left),
        ("Right", 2..=2, Some(Str), right),
        ("LCase", 1..=1, Some(Str), lcase),
        ("UCase", 1..=1, Some(Str), ucase),
        ("Trim", 1..=1, Some(Str), trim),
        ("LTrim", 1..=1, Some(Str), ltrim),
        ("RTrim", 1..=1, Some(Str), rtrim),
        ("Replace", 3..=6, Some(Str), replace),
        ("InStr", 2..=4, Some(Integer), instr),
        ("StrReverse", 1..=1, Some(Str), strreverse),
        ("CStr", 1..=1, Some(Str), cstr),
        ("CInt", 1..=1, Some(Integer), cint),
        ("CLng", 1..=1, Some(Integer), cint),
        ("CByte", 1..=1, Some(Integer), cbyte),
        ("CDbl", 1..=1, None, cdbl),
        ("Val", 1..=1, None, val),
        ("Hex", 1..=1, Some(Str), hex),
        ("Space", 1..=1, Some(Str), space),
        ("String", 2..=2, Some(Str), string),
        ("Split", 1..=4, None, split),
        ("Join", 1..=2, Some(Str), join),
        ("Array", 0..=usize::MAX, None, array),
        ("UBound", 1..=2, Some(Integer), ubound),
        ("LBound", 1..=2, Some(Integer), lbound),
        ("Abs", 1..=1, None, abs),
        ("Int", 1..=1, Some(Integer), int),
        ("Fix", 1..=1, Some(Integer), fix),
        ("IsNumeric", 1..=1, None, is_numeric),
    ];
    for (name, arity, ret, f) in pure {
        lib.register(LibraryFunction::pure(name, arity.clone(), *ret, *f));
    }

    let contextual: &[(&str, std::ops::RangeInclusive<usize>, Option<VbaType>, crate::library::ContextFn)] = &[
        ("Now", 0..=0, Some(Str), now),
        ("Date", 0..=0, Some(Str), date),
        ("Timer", 0..=0, None, timer),
        ("Shell", 1..=2, Some(Integer), shell),
        ("Run", 1..=3, Some(Integer), run),
        ("Exec", 1..=1, None, run),
        ("ShellExecute", 1..=5, None, run),
        ("CreateObject", 1..=2, None, create_object),
        ("GetObject", 0..=2, None, get_object),
        ("Execute", 1..=1, None, dynamic_execution),
        ("ExecuteGlobal", 1..=1, None, dynamic_execution),
        ("Eval", 1..=1, None, dynamic_execution),
        ("Environ", 1..=1, Some(Str), environ),
        ("MsgBox", 1..=5, Some(Integer), msgbox),
        ("URLDownloadToFile", 2..=5, Some(Integer), url_download_to_file),
        ("URLDownloadToFileA", 2..=5, Some(Integer), url_download_to_file),
        ("Open", 2..=5, None, http_open),
        ("SaveToFile", 1..=2, None, save_to_file),
        ("RtlMoveMemory", 3..=3, Some(Integer), rtl_move_memory),
    ];
    for (name, arity, ret, f) in contextual {
        lib.register(LibraryFunction::contextual(name, arity.clone(), *ret, *f));
    }
}

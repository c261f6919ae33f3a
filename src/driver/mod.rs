//! The command surface and pipeline orchestration.
//!
//! Options use the `+X` / `-X` convention: `+X` enables a switch, `-X`
//! disables it, and some options carry a parameter glued to the letter
//! (`+Ofile`, `+Ppath`, `+T100`). A bare argument is a source-file root.
//!
//! Compilation is a strict forward pipeline: parse, extract, bind, check,
//! number, flatten, emit. After any stage, a non-zero error count skips
//! the remaining stages; the process exits 0 on success and 1 when any
//! diagnostic of error severity was produced.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::base::{Name, Position};
use crate::diag::{DiagnosticSink, Fatal};
use crate::gen::{emit, flatten, number, write_blocks, BlockList, Template};
use crate::parser;
use crate::sem::{bind::Binder, check, extract, FuncTable, ProtocolMap};
use crate::source::{load_unit, root_of};
use crate::syntax::{
    Ast, CommKind, Counters, MessageKind, NodeId, NodeKind, PortRole, ProtoOp, NO_LABEL,
};

/// Default name of the runtime-support template.
pub const RUNTIME_FILE: &str = "runtime.rt";

/// Parsed command surface.
#[derive(Debug, Clone)]
pub struct Options {
    /// +A: write the syntax tree to `<root>.ast`.
    pub draw_ast: bool,
    /// +B: dump basic blocks to the log.
    pub show_blocks: bool,
    /// +F: dump the builtin function and coercion tables.
    pub show_funcs: bool,
    /// +LP / +LE / +LB / +LC / +LG: log the tree after a stage.
    pub log_parse: bool,
    pub log_extract: bool,
    pub log_bind: bool,
    pub log_check: bool,
    pub log_gen: bool,
    /// +O: override the output file name.
    pub out_file: Option<String>,
    /// +P: directory holding the runtime-support template.
    pub runtime_dir: PathBuf,
    /// +R: compile and execute in process, skipping textual emission.
    pub run_in_process: bool,
    /// +T: trace context switches; 0 means unlimited.
    pub tracing: bool,
    pub max_cycles: u32,
    /// +W: emit protocol-conformance warnings.
    pub warnings: bool,
    /// +Z: emit low-level intermediate code.
    pub low_level: bool,
    /// +C: target-language definition files to inline.
    pub native_files: Vec<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            draw_ast: false,
            show_blocks: false,
            show_funcs: false,
            log_parse: false,
            log_extract: false,
            log_bind: false,
            log_check: false,
            log_gen: false,
            out_file: None,
            runtime_dir: PathBuf::from("."),
            run_in_process: false,
            tracing: false,
            max_cycles: 100,
            warnings: false,
            low_level: false,
            native_files: Vec::new(),
        }
    }
}

impl Options {
    /// Apply one `+X`/`-X` argument. Returns false for an unknown option.
    pub fn apply(&mut self, arg: &str) -> bool {
        let mut chars = arg.chars();
        let sign = chars.next();
        let enable = sign == Some('+');
        let Some(letter) = chars.next() else {
            return false;
        };
        let rest: String = chars.collect();
        match letter.to_ascii_uppercase() {
            'A' => self.draw_ast = enable,
            'B' => self.show_blocks = enable,
            'C' => {
                let name = rest.trim_matches('"');
                if !name.is_empty() {
                    self.native_files.push(name.to_string());
                }
            }
            'F' => self.show_funcs = enable,
            'L' => {
                if enable {
                    for c in rest.chars() {
                        match c.to_ascii_uppercase() {
                            'P' => self.log_parse = true,
                            'E' => self.log_extract = true,
                            'B' => self.log_bind = true,
                            'C' => self.log_check = true,
                            'G' => self.log_gen = true,
                            _ => return false,
                        }
                    }
                }
            }
            'O' => self.out_file = Some(rest.trim_matches('"').to_string()),
            'P' => {
                if enable {
                    self.runtime_dir = PathBuf::from(rest);
                }
            }
            'R' => self.run_in_process = enable,
            'T' => {
                if enable {
                    self.tracing = true;
                    if !rest.is_empty() {
                        match rest.parse() {
                            Ok(n) => self.max_cycles = n,
                            Err(_) => return false,
                        }
                    }
                } else {
                    self.tracing = false;
                }
            }
            'W' => self.warnings = enable,
            'Z' => self.low_level = enable,
            _ => return false,
        }
        true
    }
}

/// Everything a finished compilation leaves behind.
pub struct Compilation {
    pub ast: Ast,
    pub program: NodeId,
    pub blocks: BlockList,
    pub protocols: ProtocolMap,
    pub sink: DiagnosticSink,
}

/// Compile source text through every stage. File I/O stays with the
/// caller; this is the pipeline the driver and the tests share.
pub fn compile_source(text: &str, options: &Options) -> Result<Compilation, Fatal> {
    let mut ast = Ast::new();
    let mut sink = DiagnosticSink::with_source(text);
    sink.warnings_enabled = options.warnings;

    info!("parsing");
    let program = parser::parse(text, &mut ast, &mut sink)?;
    if sink.error_count() > 0 {
        return Ok(Compilation {
            ast,
            program,
            blocks: BlockList::new(),
            protocols: ProtocolMap::default(),
            sink,
        });
    }

    info!("extracting communications");
    extract(&mut ast, &mut sink, program);

    info!("binding names");
    let sys = standard_ports(&mut ast);
    debug!(port = ?sys.port, "standard ports injected");
    let bound = {
        let mut binder = Binder::new(&mut ast, &mut sink);
        binder.predefine(sys.port, Some(sys.definition));
        binder.predefine(sys.definition, None);
        binder.bind_node(program, Some(sys.port))
    };
    if bound.is_err() || sink.error_count() > 0 {
        return Ok(Compilation {
            ast,
            program,
            blocks: BlockList::new(),
            protocols: ProtocolMap::default(),
            sink,
        });
    }

    info!("checking semantics");
    let funcs = FuncTable::new(&ast);
    let protocols = check(&mut ast, &mut sink, &funcs, program)?;
    if sink.error_count() > 0 {
        return Ok(Compilation {
            ast,
            program,
            blocks: BlockList::new(),
            protocols,
            sink,
        });
    }

    info!("numbering");
    let mut counters = Counters::default();
    number(&mut ast, &mut counters, program);

    info!("flattening");
    let blocks = flatten(&mut ast, program);

    Ok(Compilation {
        ast,
        program,
        blocks,
        protocols,
        sink,
    })
}

/// The injected standard ports: `sys` serving
/// `*( inp : Text | ^out : Text | ^err : Text )`.
pub struct StandardPorts {
    pub definition: NodeId,
    pub port: NodeId,
}

fn standard_ports(ast: &mut Ast) -> StandardPorts {
    let at = Position::default();
    let text_ty = ast.text_ty;
    let field = |ast: &mut Ast, name: &str, msg: MessageKind| {
        let field_name = ast.alloc(
            at,
            NodeKind::Name {
                text: Name::new(name),
                defining: true,
                definition: None,
                owner: Name::default(),
                var_num: NO_LABEL,
                field: None,
                by_reference: false,
            },
        );
        ast.alloc(
            at,
            NodeKind::Dec {
                name: field_name,
                ty: Some(text_ty),
                value: None,
                role: PortRole::None,
                msg,
                generated: false,
                constant: false,
                moved: false,
                alias: false,
                parameter: false,
                reference: false,
                comm: CommKind::None,
                transfer: NO_LABEL,
                temp_num: NO_LABEL,
                branch: false,
            },
        )
    };
    let inp = field(ast, "inp", MessageKind::Query);
    let out = field(ast, "out", MessageKind::Reply);
    let err = field(ast, "err", MessageKind::Reply);
    let alt = ast.alloc(
        at,
        NodeKind::ProtoAlt {
            parts: vec![inp, out, err],
        },
    );
    let star = ast.alloc(
        at,
        NodeKind::ProtoRep {
            op: ProtoOp::Many,
            operand: alt,
        },
    );
    let protocol = ast.alloc(
        at,
        NodeKind::Protocol {
            expr: star,
            name: Name::new("sysProtocol"),
            num_fields: 0,
        },
    );
    let def_name = ast.alloc(
        at,
        NodeKind::Name {
            text: Name::new("sysProtocol"),
            defining: true,
            definition: None,
            owner: Name::default(),
            var_num: NO_LABEL,
            field: None,
            by_reference: false,
        },
    );
    let definition = ast.alloc(
        at,
        NodeKind::Define {
            name: def_name,
            value: protocol,
        },
    );
    let ty_name = ast.alloc(
        at,
        NodeKind::Name {
            text: Name::new("sysProtocol"),
            defining: false,
            definition: Some(definition),
            owner: Name::default(),
            var_num: NO_LABEL,
            field: None,
            by_reference: false,
        },
    );
    let port_name = ast.alloc(
        at,
        NodeKind::Name {
            text: Name::new("sys"),
            defining: true,
            definition: None,
            owner: Name::default(),
            var_num: NO_LABEL,
            field: None,
            by_reference: false,
        },
    );
    let port = ast.alloc(
        at,
        NodeKind::Dec {
            name: port_name,
            ty: Some(ty_name),
            value: None,
            role: PortRole::Server,
            msg: MessageKind::None,
            generated: false,
            constant: false,
            moved: false,
            alias: false,
            parameter: false,
            reference: false,
            comm: CommKind::None,
            transfer: NO_LABEL,
            temp_num: NO_LABEL,
            branch: false,
        },
    );
    StandardPorts { definition, port }
}

/// Compile one source root from disk, writing outputs beside it.
pub fn compile_root(arg: &str, options: &Options) -> Result<bool, Fatal> {
    let root = root_of(arg).to_string();
    let dir = Path::new(&root)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let stem = Path::new(&root)
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.clone());

    let files = load_unit(&stem, &dir)?;
    let mut text = String::new();
    for file in &files {
        info!(file = %file.path.display(), "compiling");
        text.push_str(&file.text);
        if !text.ends_with('\n') {
            text.push('\n');
        }
    }

    let outcome = compile_source(&text, options)?;
    let rendered = outcome.sink.render_all();
    if !rendered.is_empty() {
        eprintln!("{rendered}");
    }

    let mut log = String::new();
    if options.log_parse || options.log_extract || options.log_bind || options.log_check {
        let _ = writeln!(log, "tree after front end:");
        dump_tree(&mut log, &outcome.ast, outcome.program, 0);
    }
    if options.show_blocks {
        let _ = writeln!(log, "\nbasic blocks:");
        write_blocks(&mut log, &outcome.ast, &outcome.blocks);
    }
    if !log.is_empty() {
        let log_path = dir.join(format!("{stem}.log"));
        std::fs::write(&log_path, log)
            .map_err(|e| Fatal::Io(format!("failed to write '{}': {e}", log_path.display())))?;
    }

    if options.draw_ast {
        let ast_path = dir.join(format!("{stem}.ast"));
        let mut dump = String::new();
        dump_tree(&mut dump, &outcome.ast, outcome.program, 0);
        std::fs::write(&ast_path, dump)
            .map_err(|e| Fatal::Io(format!("failed to write '{}': {e}", ast_path.display())))?;
    }

    if outcome.sink.error_count() > 0 {
        println!(
            "{} error(s); no code generated",
            outcome.sink.error_count()
        );
        return Ok(false);
    }

    if options.run_in_process {
        eprintln!("in-process execution is not available in this build");
        return Ok(true);
    }
    if options.low_level {
        eprintln!("low-level code emission is not available in this build");
    }

    let template_path = options.runtime_dir.join(RUNTIME_FILE);
    let template_text = std::fs::read_to_string(&template_path).map_err(|e| {
        Fatal::Io(format!(
            "failed to open '{}': {e}",
            template_path.display()
        ))
    })?;
    let template = Template::parse(&template_text)?;
    template.check_version()?;

    let mut native_sources = Vec::new();
    for name in &options.native_files {
        let content = std::fs::read_to_string(name)
            .map_err(|e| Fatal::Io(format!("failed to open '{name}': {e}")))?;
        native_sources.push((name.clone(), content));
    }

    let tracing = options.tracing.then_some(options.max_cycles);
    let output = emit(
        &outcome.ast,
        &outcome.blocks,
        &template,
        &native_sources,
        tracing,
    );
    let out_name = options
        .out_file
        .clone()
        .unwrap_or_else(|| format!("{root}.c"));
    std::fs::write(&out_name, output)
        .map_err(|e| Fatal::Io(format!("failed to write '{out_name}': {e}")))?;
    info!(out = %out_name, "wrote output");
    Ok(true)
}

/// Entry point shared by the binary: process arguments left to right.
/// Returns the exit code.
pub fn run(args: &[String]) -> i32 {
    let mut options = Options::default();
    let mut ok = true;
    let mut compiled_any = false;
    for arg in args {
        if arg.starts_with('+') || arg.starts_with('-') {
            if !options.apply(arg) {
                eprintln!("unknown option '{arg}'");
                ok = false;
            }
            if options.show_funcs {
                let ast = Ast::new();
                let funcs = FuncTable::new(&ast);
                for def in funcs.defs() {
                    if !def.user_name.is_empty() {
                        eprintln!(
                            "{:12} -> {:16} ({} parameter(s){})",
                            def.user_name,
                            if def.runtime_name.is_empty() {
                                "(identity)"
                            } else {
                                def.runtime_name
                            },
                            def.params.len(),
                            if def.conversion { ", coercion" } else { "" }
                        );
                    }
                }
                options.show_funcs = false;
            }
        } else {
            compiled_any = true;
            match compile_root(arg, &options) {
                Ok(success) => ok &= success,
                Err(fatal) => {
                    eprintln!("{fatal}\ncompilation terminated");
                    ok = false;
                }
            }
        }
    }
    if !compiled_any && ok {
        usage();
    }
    if ok {
        0
    } else {
        1
    }
}

fn usage() {
    eprintln!(
        "usage:\n\
         \u{20}  orielc <options> <file name>\n\n\
         option = ( '+' | '-' ) <letter> <parameter>\n\
         \u{20}  A    write syntax tree to .ast file\n\
         \u{20}  B    dump basic blocks to the log file\n\
         \u{20}  Cf   read target-language definitions from file 'f'\n\
         \u{20}  F    display the builtin function table\n\
         \u{20}  LP   log the tree after parsing (E/B/C/G likewise)\n\
         \u{20}  Of   write output to file 'f'\n\
         \u{20}  Pd   read '{RUNTIME_FILE}' from directory 'd'\n\
         \u{20}  R    compile and execute in process\n\
         \u{20}  Tn   trace n context switches (0 = unlimited)\n\
         \u{20}  W    show protocol-conformance warnings\n\
         \u{20}  Z    emit low-level intermediate code"
    );
}

/// Indented textual dump of the tree, for `+A` and the `+L` switches.
pub fn dump_tree(out: &mut String, ast: &Ast, id: NodeId, depth: usize) {
    let indent = "  ".repeat(depth);
    let node = ast.kind(id);
    let _ = writeln!(out, "{indent}#{} {}", id.0, node.tag());
    for child in children(ast, id) {
        dump_tree(out, ast, child, depth + 1);
    }
}

fn children(ast: &Ast, id: NodeId) -> Vec<NodeId> {
    match ast.kind(id) {
        NodeKind::Program { items } => items.clone(),
        NodeKind::Define { name, value } => vec![*name, *value],
        NodeKind::Constant { name, ty, value } => vec![*name, *ty, *value],
        NodeKind::Instance { name, args, .. } => {
            let mut v = vec![*name];
            v.extend(args);
            v
        }
        NodeKind::Cell {
            params, instances, ..
        } => params.iter().chain(instances).copied().collect(),
        NodeKind::Process { params, body, .. } | NodeKind::Procedure { params, body, .. } => {
            let mut v = params.clone();
            v.push(*body);
            v
        }
        NodeKind::Thread {
            inputs,
            outputs,
            body,
            ..
        } => {
            let mut v: Vec<NodeId> = inputs.iter().chain(outputs).copied().collect();
            v.push(*body);
            v
        }
        NodeKind::ThreadParam { name, ty, .. } => vec![*name, *ty],
        NodeKind::NativeDec { params, result } => {
            let mut v = params.clone();
            v.extend(result.iter());
            v
        }
        NodeKind::Protocol { expr, .. } => vec![*expr],
        NodeKind::Sequence { stmts } => stmts.clone(),
        NodeKind::If { arms, alt, .. } => {
            let mut v = arms.clone();
            v.push(*alt);
            v
        }
        NodeKind::CondArm {
            decs, cond, body, ..
        } => {
            let mut v = decs.clone();
            v.push(*cond);
            v.push(*body);
            v
        }
        NodeKind::Loop { body, .. } => vec![*body],
        NodeKind::For { comp, body, .. } => vec![*comp, *body],
        NodeKind::Any {
            comp, body, alt, ..
        } => vec![*comp, *body, *alt],
        NodeKind::Select { options, .. } => options.clone(),
        NodeKind::SelectOption { guard, body, .. } => {
            let mut v: Vec<NodeId> = guard.iter().copied().collect();
            v.push(*body);
            v
        }
        NodeKind::Dec {
            name, ty, value, ..
        } => {
            let mut v = vec![*name];
            v.extend(ty.iter());
            v.extend(value.iter());
            v
        }
        NodeKind::Start { calls, body } => {
            let mut v = calls.clone();
            v.push(*body);
            v
        }
        NodeKind::ThreadCall {
            name,
            inputs,
            outputs,
            ..
        } => {
            let mut v = vec![*name];
            v.extend(inputs);
            v.extend(outputs);
            v
        }
        NodeKind::Binop { lhs, rhs, .. } => vec![*lhs, *rhs],
        NodeKind::Unop { operand, .. } => vec![*operand],
        NodeKind::CondExpr { lhs, pred, rhs, .. } => vec![*lhs, *pred, *rhs],
        NodeKind::Call { name, args, .. } => {
            let mut v = vec![*name];
            v.extend(args);
            v
        }
        NodeKind::Subscript { base, index, .. } => vec![*base, *index],
        NodeKind::Subrange { base, lo, hi, .. } => vec![*base, *lo, *hi],
        NodeKind::Dot { port, field } | NodeKind::Query { port, field, .. } => {
            vec![*port, *field]
        }
        NodeKind::IterOp { map, .. } => vec![*map],
        NodeKind::ProtoSeq { parts } | NodeKind::ProtoAlt { parts } => parts.clone(),
        NodeKind::ProtoRep { operand, .. } => vec![*operand],
        NodeKind::Comprehension {
            var,
            ty,
            collection,
            pred,
            ..
        } => {
            let mut v = vec![*var];
            v.extend(ty.iter());
            v.push(*collection);
            v.extend(pred.iter());
            v
        }
        NodeKind::RangeSet {
            start,
            finish,
            step,
            ..
        } => {
            let mut v = vec![*start, *finish];
            v.extend(step.iter());
            v
        }
        NodeKind::MapSet { map, .. } => vec![*map],
        NodeKind::EnumType { values, .. } => values.clone(),
        NodeKind::ArrayType { elem, lo, hi } => vec![*elem, *lo, *hi],
        NodeKind::MapType { domain, range, .. } => vec![*domain, *range],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_parse_the_command_surface() {
        let mut options = Options::default();
        assert!(options.apply("+A"));
        assert!(options.draw_ast);
        assert!(options.apply("-A"));
        assert!(!options.draw_ast);
        assert!(options.apply("+LPC"));
        assert!(options.log_parse);
        assert!(options.log_check);
        assert!(!options.log_gen);
        assert!(options.apply("+Oout.c"));
        assert_eq!(options.out_file.as_deref(), Some("out.c"));
        assert!(options.apply("+T250"));
        assert!(options.tracing);
        assert_eq!(options.max_cycles, 250);
        assert!(options.apply("+W"));
        assert!(options.warnings);
        assert!(!options.apply("+Q"));
    }

    #[test]
    fn pipeline_produces_blocks_for_a_process() {
        let options = Options::default();
        let text = "P = [ a ; b ];\n\
                    Q = process p : +P | p.a; p.b end";
        let outcome = compile_source(text, &options).unwrap();
        assert_eq!(outcome.sink.error_count(), 0, "{}", outcome.sink.render_all());
        assert!(!outcome.blocks.is_empty());
        // The closure block is first and carries the process.
        assert!(outcome.blocks[0].closure.is_some());
    }

    #[test]
    fn sys_port_is_usable_without_declaration() {
        let options = Options::default();
        let text = "Q = process | sys.out := \"hello\" end";
        let outcome = compile_source(text, &options).unwrap();
        assert_eq!(outcome.sink.error_count(), 0, "{}", outcome.sink.render_all());
    }

    #[test]
    fn errors_suppress_later_stages() {
        let options = Options::default();
        let text = "Q = process | select end end";
        let outcome = compile_source(text, &options).unwrap();
        assert!(outcome.sink.error_count() > 0);
        assert!(outcome.blocks.is_empty());
    }
}

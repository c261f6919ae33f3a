//! The builtin function and coercion table.
//!
//! One curated table covers both implicit coercions and the overloaded
//! user-level functions (`bool`, `int`, `text`, `format`, ...). Each entry
//! names the Oriel-level function, the runtime routine that implements it,
//! the parameter types, and the result type; entries flagged `conversion`
//! are also eligible as implicit coercions. Overload selection picks the
//! entry needing the fewest conversions, with [`MAX_CONV`] as unreachable.

use crate::base::Name;
use crate::syntax::{Ast, NodeId};

/// "Infinity" for conversion counting.
pub const MAX_CONV: u32 = 100_000;

/// A parameter type pattern. Enumerations and arrays are matched by shape
/// because each enumeration and array declaration is its own type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamTy {
    Exact(NodeId),
    AnyEnum,
    AnyArray,
}

/// One table entry.
#[derive(Debug, Clone)]
pub struct FuncDef {
    /// Name the programmer writes.
    pub user_name: &'static str,
    /// Backend identifier of the runtime routine; empty for no-ops.
    pub runtime_name: &'static str,
    pub params: Vec<ParamTy>,
    pub result: NodeId,
    /// Eligible as an implicit coercion.
    pub conversion: bool,
}

/// Result of a conversion lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Types agree; nothing to insert.
    Identity,
    /// Apply the table entry at this index.
    Fun(usize),
    /// No conversion exists.
    Bottom,
}

/// The table, built once per compilation against the arena's singletons.
#[derive(Debug)]
pub struct FuncTable {
    defs: Vec<FuncDef>,
}

impl FuncTable {
    pub fn new(ast: &Ast) -> Self {
        let mut defs = Vec::new();
        let mut add = |user_name: &'static str,
                       runtime_name: &'static str,
                       params: Vec<ParamTy>,
                       result: NodeId,
                       conversion: bool| {
            defs.push(FuncDef {
                user_name,
                runtime_name,
                params,
                result,
                conversion,
            });
        };
        let e = ParamTy::Exact;

        // Assertions
        add("assert", "assert_1", vec![e(ast.bool_ty)], ast.void_ty, false);
        add(
            "assert",
            "assert_2",
            vec![e(ast.bool_ty), e(ast.text_ty)],
            ast.void_ty,
            false,
        );

        // Bool
        add("bool", "", vec![e(ast.bool_ty)], ast.bool_ty, true);
        add("bool", "string2bool", vec![e(ast.text_ty)], ast.bool_ty, false);

        // Char
        add("char", "", vec![e(ast.char_ty)], ast.char_ty, true);
        add("encode", "encode2char", vec![e(ast.int_ty)], ast.char_ty, false);
        add("char", "string2char", vec![e(ast.text_ty)], ast.char_ty, true);

        // Byte
        add("byte", "", vec![e(ast.byte_ty)], ast.byte_ty, true);
        add("byte", "int2byte", vec![e(ast.int_ty)], ast.byte_ty, true);
        add("byte", "uint2byte", vec![e(ast.uint_ty)], ast.byte_ty, true);
        add("byte", "ubyte2byte", vec![e(ast.ubyte_ty)], ast.byte_ty, true);

        // Unsigned Byte
        add("byte", "", vec![e(ast.ubyte_ty)], ast.ubyte_ty, true);
        add("byte", "byte2ubyte", vec![e(ast.byte_ty)], ast.ubyte_ty, true);
        add("byte", "int2ubyte", vec![e(ast.int_ty)], ast.ubyte_ty, true);
        add("byte", "uint2ubyte", vec![e(ast.uint_ty)], ast.ubyte_ty, true);

        // Integer
        add("int", "", vec![e(ast.int_ty)], ast.int_ty, true);
        add("int", "", vec![e(ast.uint_ty)], ast.int_ty, true);
        add("int", "", vec![e(ast.byte_ty)], ast.int_ty, true);
        add("int", "", vec![e(ast.ubyte_ty)], ast.int_ty, true);
        add("floor", "double2floor", vec![e(ast.float_ty)], ast.int_ty, false);
        add("round", "double2round", vec![e(ast.float_ty)], ast.int_ty, false);
        add(
            "ceiling",
            "double2ceiling",
            vec![e(ast.float_ty)],
            ast.int_ty,
            false,
        );
        add("floor", "double2floor", vec![e(ast.decimal_ty)], ast.int_ty, false);
        add("round", "double2round", vec![e(ast.decimal_ty)], ast.int_ty, false);
        add(
            "ceiling",
            "double2ceiling",
            vec![e(ast.decimal_ty)],
            ast.int_ty,
            false,
        );
        add("int", "char2int", vec![e(ast.char_ty)], ast.int_ty, false);
        add("decode", "char2decode", vec![e(ast.char_ty)], ast.int_ty, false);
        add("int", "string2int", vec![e(ast.text_ty)], ast.int_ty, false);
        add("int", "", vec![ParamTy::AnyEnum], ast.int_ty, true);

        // Unsigned Integer
        add("int", "", vec![e(ast.uint_ty)], ast.uint_ty, true);
        add("int", "byte2uint", vec![e(ast.byte_ty)], ast.uint_ty, true);
        add("int", "ubyte2uint", vec![e(ast.ubyte_ty)], ast.uint_ty, true);
        add("int", "int2uint", vec![e(ast.int_ty)], ast.uint_ty, true);

        // Float
        add("float", "", vec![e(ast.float_ty)], ast.float_ty, true);
        add("float", "double", vec![e(ast.int_ty)], ast.float_ty, true);
        add("float", "double", vec![e(ast.uint_ty)], ast.float_ty, true);
        add("float", "double", vec![e(ast.byte_ty)], ast.float_ty, true);
        add("float", "double", vec![e(ast.ubyte_ty)], ast.float_ty, true);
        add("float", "", vec![e(ast.decimal_ty)], ast.float_ty, true);
        add(
            "float",
            "string2double",
            vec![e(ast.text_ty)],
            ast.float_ty,
            false,
        );

        // Decimal
        add("decimal", "", vec![e(ast.decimal_ty)], ast.decimal_ty, true);
        add("decimal", "", vec![e(ast.float_ty)], ast.decimal_ty, false);
        add("decimal", "double", vec![e(ast.byte_ty)], ast.decimal_ty, true);
        add("decimal", "double", vec![e(ast.ubyte_ty)], ast.decimal_ty, true);
        add("decimal", "double", vec![e(ast.int_ty)], ast.decimal_ty, true);
        add("decimal", "double", vec![e(ast.uint_ty)], ast.decimal_ty, true);
        add(
            "decimal",
            "string2double",
            vec![e(ast.text_ty)],
            ast.decimal_ty,
            false,
        );

        // Text. The enumeration entry comes first so that `text` applied
        // to an enumeration value renders the value name rather than its
        // ordinal.
        add("text", "enum2string", vec![ParamTy::AnyEnum], ast.text_ty, true);
        add("text", "", vec![e(ast.text_ty)], ast.text_ty, true);
        add("text", "bool2string1", vec![e(ast.bool_ty)], ast.text_ty, true);
        add("text", "ubyte2string1", vec![e(ast.ubyte_ty)], ast.text_ty, true);
        add("text", "byte2string1", vec![e(ast.byte_ty)], ast.text_ty, true);
        add("text", "int2string1", vec![e(ast.int_ty)], ast.text_ty, true);
        add("text", "uint2string1", vec![e(ast.uint_ty)], ast.text_ty, true);
        add("text", "double2string1", vec![e(ast.decimal_ty)], ast.text_ty, true);
        add("text", "double2string1", vec![e(ast.float_ty)], ast.text_ty, true);
        add("text", "char2string1", vec![e(ast.char_ty)], ast.text_ty, true);

        // Format (width)
        add(
            "format",
            "bool2string2",
            vec![e(ast.bool_ty), e(ast.int_ty)],
            ast.text_ty,
            false,
        );
        add(
            "format",
            "int2string2",
            vec![e(ast.int_ty), e(ast.int_ty)],
            ast.text_ty,
            false,
        );
        add(
            "format",
            "uint2string2",
            vec![e(ast.uint_ty), e(ast.int_ty)],
            ast.text_ty,
            false,
        );
        add(
            "format",
            "double2string2",
            vec![e(ast.decimal_ty), e(ast.int_ty)],
            ast.text_ty,
            false,
        );
        add(
            "format",
            "double2string2",
            vec![e(ast.float_ty), e(ast.int_ty)],
            ast.text_ty,
            false,
        );
        add(
            "format",
            "char2string2",
            vec![e(ast.char_ty), e(ast.int_ty)],
            ast.text_ty,
            false,
        );
        add(
            "format",
            "string2string2",
            vec![e(ast.text_ty), e(ast.int_ty)],
            ast.text_ty,
            false,
        );

        // Format (width and precision)
        add(
            "format",
            "double2string3",
            vec![e(ast.decimal_ty), e(ast.int_ty), e(ast.int_ty)],
            ast.text_ty,
            false,
        );
        add(
            "format",
            "double2string3",
            vec![e(ast.float_ty), e(ast.int_ty), e(ast.int_ty)],
            ast.text_ty,
            false,
        );

        // Random numbers
        add("rand", "random", vec![e(ast.int_ty)], ast.int_ty, false);

        // Files
        add(
            "file_open_read",
            "file_open",
            vec![e(ast.text_ty)],
            ast.infile_ty,
            false,
        );
        add(
            "file_open_write",
            "file_open",
            vec![e(ast.text_ty)],
            ast.outfile_ty,
            false,
        );
        add(
            "file_close",
            "file_close",
            vec![e(ast.infile_ty)],
            ast.void_ty,
            false,
        );
        add(
            "file_close",
            "file_close",
            vec![e(ast.outfile_ty)],
            ast.void_ty,
            false,
        );
        add("file_ok", "file_ok", vec![e(ast.infile_ty)], ast.bool_ty, false);
        add("file_ok", "file_ok", vec![e(ast.outfile_ty)], ast.bool_ty, false);
        add("file_eof", "file_eof", vec![e(ast.infile_ty)], ast.bool_ty, false);
        add(
            "file_read",
            "file_read",
            vec![e(ast.infile_ty)],
            ast.text_ty,
            false,
        );
        add(
            "file_write",
            "file_write",
            vec![e(ast.outfile_ty), e(ast.text_ty)],
            ast.void_ty,
            false,
        );

        // Length of text, size of array
        add("#", "stringlen", vec![e(ast.text_ty)], ast.int_ty, false);
        add("#", "size", vec![ParamTy::AnyArray], ast.int_ty, false);

        // Map-element existence test
        add("exists", "exists", vec![ParamTy::AnyArray], ast.bool_ty, false);

        // Hidden entry: reachable only through coercion. An integer
        // entering an enumeration gets a run-time range check.
        add("", "int2enum", vec![e(ast.int_ty)], ast.void_ty, false);

        Self { defs }
    }

    /// Index of the hidden integer-to-enumeration wrapper.
    pub fn int_enum_index(&self) -> usize {
        self.defs
            .iter()
            .position(|d| d.runtime_name == "int2enum")
            .unwrap_or(0)
    }

    pub fn get(&self, index: usize) -> &FuncDef {
        &self.defs[index]
    }

    pub fn defs(&self) -> &[FuncDef] {
        &self.defs
    }

    /// Index of the `exists` pseudo-function.
    pub fn exists_index(&self) -> usize {
        self.defs
            .iter()
            .position(|d| d.user_name == "exists")
            .unwrap_or(0)
    }

    /// True when some entry carries the given user-level name.
    pub fn has_user_name(&self, name: &Name) -> bool {
        self.defs.iter().any(|d| d.user_name == name.as_str())
    }

    /// Look up the implicit conversion from one type to another.
    pub fn conversion(&self, ast: &Ast, from: NodeId, to: NodeId) -> Conversion {
        let from = ast.resolve_type(from);
        let to = ast.resolve_type(to);

        if ast.same_type(from, to) {
            return Conversion::Identity;
        }

        // Enumeration to integer is the identity at runtime.
        if ast.is_enum_type(from) && (to == ast.int_ty || to == ast.uint_ty) {
            return Conversion::Identity;
        }

        // Distinct enumerations never convert.
        if ast.is_enum_type(from) && ast.is_enum_type(to) {
            return Conversion::Bottom;
        }

        for (i, def) in self.defs.iter().enumerate() {
            if def.conversion
                && def.params.len() == 1
                && self.param_matches(ast, def.params[0], from)
                && ast.same_type(def.result, to)
            {
                return Conversion::Fun(i);
            }
        }
        Conversion::Bottom
    }

    /// Whether a parameter pattern accepts a type exactly.
    pub fn param_matches(&self, ast: &Ast, param: ParamTy, ty: NodeId) -> bool {
        match param {
            ParamTy::Exact(p) => ast.same_type(p, ty),
            ParamTy::AnyEnum => ast.is_enum_type(ty),
            ParamTy::AnyArray => ast.is_array_type(ty) || ast.is_map_type(ty),
        }
    }

    /// Count the conversions an argument list needs against a parameter
    /// list, or [`MAX_CONV`] when some argument cannot be converted.
    pub fn count_conversions(&self, ast: &Ast, params: &[ParamTy], args: &[NodeId]) -> u32 {
        debug_assert_eq!(params.len(), args.len());
        let mut count = 0;
        for (&param, &arg) in params.iter().zip(args) {
            match param {
                ParamTy::Exact(p) => match self.conversion(ast, arg, p) {
                    Conversion::Bottom => return MAX_CONV,
                    Conversion::Identity => {}
                    _ => count += 1,
                },
                ParamTy::AnyEnum => {
                    if !ast.is_enum_type(arg) {
                        return MAX_CONV;
                    }
                }
                ParamTy::AnyArray => {
                    if !(ast.is_array_type(arg) || ast.is_map_type(arg) || arg == ast.text_ty) {
                        return MAX_CONV;
                    }
                }
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_for_equal_types() {
        let ast = Ast::new();
        let table = FuncTable::new(&ast);
        assert_eq!(
            table.conversion(&ast, ast.int_ty, ast.int_ty),
            Conversion::Identity
        );
    }

    #[test]
    fn widening_is_found_in_the_table() {
        let ast = Ast::new();
        let table = FuncTable::new(&ast);
        match table.conversion(&ast, ast.int_ty, ast.float_ty) {
            Conversion::Fun(i) => assert_eq!(table.get(i).result, ast.float_ty),
            other => panic!("expected table conversion, got {other:?}"),
        }
    }

    #[test]
    fn bool_to_int_is_bottom() {
        let ast = Ast::new();
        let table = FuncTable::new(&ast);
        assert_eq!(
            table.conversion(&ast, ast.bool_ty, ast.int_ty),
            Conversion::Bottom
        );
    }

    #[test]
    fn counting_saturates_on_impossible_arguments() {
        let ast = Ast::new();
        let table = FuncTable::new(&ast);
        let params = [ParamTy::Exact(ast.int_ty)];
        assert_eq!(
            table.count_conversions(&ast, &params, &[ast.bool_ty]),
            MAX_CONV
        );
        assert_eq!(table.count_conversions(&ast, &params, &[ast.byte_ty]), 1);
        assert_eq!(table.count_conversions(&ast, &params, &[ast.int_ty]), 0);
    }
}

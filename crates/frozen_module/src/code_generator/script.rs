//! Single-script units with a `main` entry point

use std::fmt::Write;

use super::{SCRIPT_INIT_FUNCTION, render_body};
use crate::{c_literal, serializer::FrozenUnit};

/// Render a program that runs the frozen code object `root` as `__main__`
///
/// `source_name` only appears in the header comment.
pub fn render_script(unit: &FrozenUnit, root: &str, source_name: &str) -> String {
    let header = format!("Frozen script {}", c_literal::comment_text(source_name));
    let mut out = render_body(unit, &header, SCRIPT_INIT_FUNCTION, false);
    let _ = write!(
        out,
        r#"
int
main(int argc, char *argv[])
{{
    wchar_t **wargv;
    PyObject *main_module, *globals, *result;
    int i, status = 0;

    wargv = (wchar_t **)PyMem_RawMalloc(sizeof(wchar_t *) * (argc + 1));
    if (wargv == NULL) {{
        fprintf(stderr, "Fatal error: out of memory\n");
        return 1;
    }}
    for (i = 0; i < argc; i++) {{
        wargv[i] = Py_DecodeLocale(argv[i], NULL);
        if (wargv[i] == NULL) {{
            fprintf(stderr, "Fatal error: cannot decode argv[%d]\n", i);
            return 1;
        }}
    }}
    wargv[argc] = NULL;

    Py_SetProgramName(wargv[0]);
    Py_Initialize();
    PySys_SetArgvEx(argc, wargv, 0);
    {SCRIPT_INIT_FUNCTION}();

    main_module = PyImport_AddModule("__main__");
    if (main_module == NULL) {{
        PyErr_Print();
        return 1;
    }}
    globals = PyModule_GetDict(main_module);
    result = PyEval_EvalCode({root}, globals, globals);
    if (result == NULL) {{
        PyErr_Print();
        status = 1;
    }} else {{
        Py_DECREF(result);
    }}
    if (Py_FinalizeEx() < 0) {{
        status = 120;
    }}
    for (i = 0; i < argc; i++) {{
        PyMem_RawFree(wargv[i]);
    }}
    PyMem_RawFree(wargv);
    return status;
}}
"#
    );
    out
}

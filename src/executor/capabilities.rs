//! The closed set of names generated code can reference.
//!
//! Values live in the engine prelude; this list decides which of them become
//! parameters of the module scope. Anything else is a `ReferenceError` when
//! the module runs.

pub const UI_PRIMITIVES: &[&str] = &[
    "View",
    "Text",
    "TextInput",
    "TouchableOpacity",
    "TouchableHighlight",
    "TouchableWithoutFeedback",
    "Pressable",
    "Button",
    "Switch",
    "Image",
    "ScrollView",
    "FlatList",
    "SectionList",
    "Modal",
    "ActivityIndicator",
    "SafeAreaView",
    "KeyboardAvoidingView",
    "StatusBar",
    "RefreshControl",
    "StyleSheet",
    "Animated",
    "Easing",
    "Platform",
    "Dimensions",
    "Alert",
    "Keyboard",
    "Vibration",
    "LayoutAnimation",
    "Fragment",
    "React",
];

pub const STATE_PRIMITIVES: &[&str] = &[
    "useState",
    "useEffect",
    "useLayoutEffect",
    "useReducer",
    "useMemo",
    "useCallback",
    "useRef",
    "useContext",
    "useImperativeHandle",
    "useWindowDimensions",
    "useColorScheme",
    "createContext",
    "memo",
    "forwardRef",
];

pub const SERVICES: &[&str] = &[
    "AsyncStorage",
    "Notifications",
    "Permissions",
    "useFocusEffect",
    "router",
    "useRouter",
    "useNavigation",
];

pub const CHARTS_AND_ICONS: &[&str] = &[
    "LineChart",
    "BarChart",
    "PieChart",
    "Ionicons",
    "MaterialIcons",
    "MaterialCommunityIcons",
    "Feather",
    "FontAwesome",
    "FontAwesome5",
    "AntDesign",
    "Entypo",
    "theme",
];

pub const SAFE_HELPERS: &[&str] = &[
    "safeLength",
    "safeArray",
    "safeObject",
    "safeNumber",
    "safeString",
    "safeFilter",
    "safeMap",
    "safeReduce",
    "safeFind",
];

pub const DOCUMENT_PRIMITIVES: &[&str] = &[
    "initializeApp",
    "getApps",
    "getApp",
    "app",
    "getDatabase",
    "ref",
    "child",
    "push",
    "get",
    "set",
    "update",
    "remove",
    "onValue",
    "off",
];

pub const RUNTIME: &[&str] = &[
    "setTimeout",
    "clearTimeout",
    "setInterval",
    "clearInterval",
    "requestAnimationFrame",
    "cancelAnimationFrame",
    "console",
    "__registerCleanup",
    "__h",
    "__seq",
    "__len",
];

/// Every capability in parameter order.
pub fn capability_names() -> Vec<&'static str> {
    [
        UI_PRIMITIVES,
        STATE_PRIMITIVES,
        SERVICES,
        CHARTS_AND_ICONS,
        SAFE_HELPERS,
        DOCUMENT_PRIMITIVES,
        RUNTIME,
    ]
    .concat()
}

/// Wrap a lowered module body so capabilities arrive as parameters and the
/// component comes back as the return value.
///
/// The body runs in an inner function so its own `const`/`let` declarations
/// may shadow capability names.
pub fn wrap_module(body: &str, names: &[&str]) -> String {
    let params = names.join(", ");
    format!(
        "(function ({params}, exports, module) {{\nreturn (function () {{\n{body}\n;return {EXPORT_TRAILER};\n}})();\n}})"
    )
}

const EXPORT_TRAILER: &str = "exports.default !== undefined ? exports.default \
: (module.exports && module.exports.default !== undefined) ? module.exports.default \
: typeof module.exports === 'function' ? module.exports \
: typeof App === 'function' ? App : undefined";
